//! Config file creation and rotation.

use tracing::{error, info, warn};

use moorage_core::{ConfigFileContent, config_file_id, config_file_version, content_digest, epoch_secs};
use moorage_state::{ConfigFile, ConfigId, StateStore};

use crate::error::{ManageError, ManageResult};

fn new_config_file(service_uuid: &str, file_id: String, content: &ConfigFileContent) -> ConfigFile {
    ConfigFile {
        service_uuid: service_uuid.to_string(),
        file_id,
        revision: 0,
        file_name: content.file_name.clone(),
        file_mode: content.file_mode,
        content_digest: content_digest(&content.content),
        content: content.content.clone(),
        last_modified: epoch_secs(),
    }
}

/// Create a config file, adopting an identical one left by an earlier attempt.
pub(crate) fn create_config_file(state: &StateStore, file: ConfigFile) -> ManageResult<ConfigFile> {
    match state.create_config_file(&file) {
        Ok(()) => {
            info!(file_id = %file.file_id, file_name = %file.file_name, "config file created");
            Ok(file)
        }
        Err(e) if e.is_conflict() => {
            let existing = state
                .get_config_file(&file.service_uuid, &file.file_id)?
                .ok_or_else(|| {
                    ManageError::Internal(format!("config file {} vanished after conflict", file.file_id))
                })?;
            if existing.file_name != file.file_name
                || existing.file_mode != file.file_mode
                || existing.content_digest != file.content_digest
            {
                error!(file_id = %file.file_id, "config file exists with different content");
                return Err(ManageError::ConfigMismatch(file.file_id));
            }
            info!(file_id = %file.file_id, "config file already exists");
            Ok(existing)
        }
        Err(e) => Err(e.into()),
    }
}

/// Create version 0 of every file under `prefix` (service or member name).
pub(crate) fn create_config_files(
    state: &StateStore,
    service_uuid: &str,
    prefix: &str,
    contents: &[ConfigFileContent],
) -> ManageResult<Vec<ConfigId>> {
    contents
        .iter()
        .map(|content| {
            let file_id = config_file_id(prefix, &content.file_name, 0);
            let file = new_config_file(service_uuid, file_id, content);
            create_config_file(state, file).map(|f| f.config_id())
        })
        .collect()
}

/// Delete files by reference, ignoring ones already gone.
pub(crate) fn delete_config_files(
    state: &StateStore,
    service_uuid: &str,
    configs: &[ConfigId],
) -> ManageResult<()> {
    for cfg in configs {
        if state.delete_config_file(service_uuid, &cfg.file_id)? {
            info!(file_id = %cfg.file_id, "config file deleted");
        }
    }
    Ok(())
}

/// Write the next version of one member config file and point the member at it.
///
/// The member update is conditional; losing it surfaces
/// `ConditionalCheckFailed` and leaves the new version orphaned until the
/// caller retries. The superseded version is removed best-effort.
pub(crate) fn rotate_member_config(
    state: &StateStore,
    service_uuid: &str,
    member_name: &str,
    file_name: &str,
    content: &str,
) -> ManageResult<ConfigId> {
    let member = state
        .get_service_member(service_uuid, member_name)?
        .ok_or_else(|| ManageError::NotFound(format!("member {member_name}")))?;
    let idx = member
        .spec
        .configs
        .iter()
        .position(|c| c.file_name == file_name)
        .ok_or_else(|| ManageError::NotFound(format!("config {file_name} of member {member_name}")))?;
    let old = &member.spec.configs[idx];
    let old_file = state
        .get_config_file(service_uuid, &old.file_id)?
        .ok_or_else(|| ManageError::NotFound(format!("config file {}", old.file_id)))?;
    let version = config_file_version(&old.file_id)
        .ok_or_else(|| ManageError::Internal(format!("config file id {} has no version", old.file_id)))?;

    let next = ConfigFileContent {
        file_name: file_name.to_string(),
        file_mode: old_file.file_mode,
        content: content.to_string(),
    };
    let file_id = config_file_id(member_name, file_name, version + 1);
    let file = create_config_file(state, new_config_file(service_uuid, file_id, &next))?;
    let new_id = file.config_id();

    let mut configs = member.spec.configs.clone();
    configs[idx] = new_id.clone();
    state.update_service_member(&member, &member.with_configs(configs))?;
    info!(member = %member_name, file_id = %new_id.file_id, "member config rotated");

    if let Err(e) = state.delete_config_file(service_uuid, &old.file_id) {
        warn!(file_id = %old.file_id, error = %e, "failed to delete superseded config file");
    }
    Ok(new_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use moorage_state::{MemberMeta, MemberSpec, MemberVolumes, ServiceMember};

    fn content(name: &str, body: &str) -> ConfigFileContent {
        ConfigFileContent {
            file_name: name.into(),
            file_mode: 0o600,
            content: body.into(),
        }
    }

    #[test]
    fn create_adopts_identical_retry() {
        let state = StateStore::open_in_memory().unwrap();
        let files = [content("zoo.cfg", "tickTime=2000")];
        let first = create_config_files(&state, "u1", "zk-0", &files).unwrap();
        let second = create_config_files(&state, "u1", "zk-0", &files).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn create_rejects_different_content_under_same_id() {
        let state = StateStore::open_in_memory().unwrap();
        create_config_files(&state, "u1", "zk-0", &[content("zoo.cfg", "a")]).unwrap();
        let err = create_config_files(&state, "u1", "zk-0", &[content("zoo.cfg", "b")]).unwrap_err();
        assert!(matches!(err, ManageError::ConfigMismatch(_)));
    }

    #[test]
    fn rotation_bumps_version_and_drops_old_file() {
        let state = StateStore::open_in_memory().unwrap();
        let configs = create_config_files(&state, "u1", "zk-0", &[content("zoo.cfg", "v0")]).unwrap();
        let member = ServiceMember {
            service_uuid: "u1".into(),
            member_name: "zk-0".into(),
            revision: 0,
            meta: MemberMeta {
                create_time: 1,
                last_modified: 1,
            },
            spec: MemberSpec {
                availability_zone: "zone-a".into(),
                static_ip: None,
                volumes: MemberVolumes::default(),
                configs: configs.clone(),
                server_instance_id: None,
            },
        };
        state.create_service_member(&member).unwrap();

        let new_id = rotate_member_config(&state, "u1", "zk-0", "zoo.cfg", "v1").unwrap();
        assert_eq!(config_file_version(&new_id.file_id), Some(1));
        assert!(state.get_config_file("u1", &configs[0].file_id).unwrap().is_none());

        let stored = state.get_service_member("u1", "zk-0").unwrap().unwrap();
        assert_eq!(stored.revision, 1);
        assert_eq!(stored.spec.configs, vec![new_id.clone()]);
        let file = state.get_config_file("u1", &new_id.file_id).unwrap().unwrap();
        assert_eq!(file.content, "v1");

        let err = rotate_member_config(&state, "u1", "zk-0", "missing.cfg", "x").unwrap_err();
        assert!(matches!(err, ManageError::NotFound(_)));
    }
}
