//! Service lifecycle tests.
//!
//! Drives `ManageService` against an in-memory store and the in-memory
//! platform adapters: create, retry, initialize, and delete.

use std::sync::Arc;
use std::time::Duration;

use moorage_core::*;
use moorage_manage::*;
use moorage_platform::mem::{MemContainerPlatform, MemDns, MemServer, RunTaskHook, interface};
use moorage_platform::{
    CloudServer, ContainerPlatform, ContainerServiceOptions, DnsProvider, PlatformKind, RunTaskOptions,
    VolumeState,
};
use moorage_state::*;
use moorage_tasks::{InitTaskConfig, InitTaskScheduler};

struct Harness {
    svc: ManageService,
    state: StateStore,
    platform: Arc<MemContainerPlatform>,
    dns: Arc<MemDns>,
    server: Arc<MemServer>,
}

fn test_config() -> ManageConfig {
    let mut config = ManageConfig::new("c1", "us-east-1", "vpc-1");
    config.retry_wait = Duration::from_millis(1);
    config
}

fn harness_with(state: StateStore, platform: MemContainerPlatform) -> Harness {
    let platform = Arc::new(platform);
    let dns = Arc::new(MemDns::new());
    let server = Arc::new(MemServer::new());
    let svc = ManageService::new(
        state.clone(),
        platform.clone(),
        dns.clone(),
        server.clone(),
        test_config(),
    );
    Harness {
        svc,
        state,
        platform,
        dns,
        server,
    }
}

fn harness() -> Harness {
    harness_with(
        StateStore::open_in_memory().unwrap(),
        MemContainerPlatform::new(PlatformKind::Ecs),
    )
}

fn file(name: &str, content: &str) -> ConfigFileContent {
    ConfigFileContent {
        file_name: name.into(),
        file_mode: 0o600,
        content: content.into(),
    }
}

fn stateful_request(name: &str, zones: &[&str]) -> CreateServiceRequest {
    CreateServiceRequest {
        service: ServiceId {
            region: "us-east-1".into(),
            cluster: "c1".into(),
            name: name.into(),
        },
        service_type: ServiceType::Stateful,
        catalog_service_type: "zookeeper".into(),
        replicas: zones.len() as u32,
        resources: Resources::default(),
        volume: Some(VolumeSpec {
            volume_type: "gp2".into(),
            size_gb: 10,
            iops: 0,
            encrypted: false,
        }),
        journal_volume: None,
        register_dns: true,
        require_static_ip: false,
        service_configs: vec![file("service.conf", "replicas=3")],
        replica_configs: zones
            .iter()
            .enumerate()
            .map(|(i, zone)| ReplicaConfig {
                zone: zone.to_string(),
                configs: vec![file("zoo.cfg", &format!("myid={i}"))],
            })
            .collect(),
    }
}

fn status_of(h: &Harness, name: &str) -> ServiceStatus {
    h.svc.get_service_attr("c1", name).unwrap().meta.status
}

// ── Create ─────────────────────────────────────────────────────────

#[tokio::test]
async fn create_materializes_members_and_moves_to_initializing() {
    let h = harness();
    let req = stateful_request("zk", &["zone-a", "zone-b", "zone-c"]);

    let uuid = h.svc.create_service(&req).await.unwrap();
    assert_eq!(status_of(&h, "zk"), ServiceStatus::Initializing);

    let members = h.svc.list_service_members("c1", "zk").unwrap();
    let mut names: Vec<_> = members.iter().map(|m| m.member_name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["zk-0", "zk-1", "zk-2"]);
    for m in &members {
        assert_eq!(m.service_uuid, uuid);
        assert_eq!(m.spec.configs.len(), 1);
        let vol = m.spec.volumes.primary.as_ref().unwrap();
        assert_eq!(vol.device_name, "/dev/xvdb");
        assert_eq!(h.server.get_volume_state(&vol.volume_id).await.unwrap(), VolumeState::Available);
    }

    let zk1 = members.iter().find(|m| m.member_name == "zk-1").unwrap();
    assert_eq!(zk1.spec.availability_zone, "zone-b");
    let cfg = h.state.get_config_file(&uuid, &zk1.spec.configs[0].file_id).unwrap().unwrap();
    assert_eq!(cfg.content, "myid=1");

    let devices = h.state.list_devices("c1").unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(h.dns.record_count().await, 3);
    assert_eq!(h.server.volume_count().await, 3);
}

#[tokio::test]
async fn repeated_create_returns_same_service() {
    let h = harness();
    let req = stateful_request("zk", &["zone-a", "zone-b", "zone-c"]);

    let first = h.svc.create_service(&req).await.unwrap();
    let second = h.svc.create_service(&req).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.svc.list_service_members("c1", "zk").unwrap().len(), 3);
    assert_eq!(h.state.list_devices("c1").unwrap().len(), 1);
    assert_eq!(h.server.volume_count().await, 3);
}

#[tokio::test]
async fn create_resumes_with_missing_member() {
    let h = harness();
    let req = stateful_request("zk", &["zone-a", "zone-b", "zone-c"]);
    let uuid = h.svc.create_service(&req).await.unwrap();
    let old_zk2 = h.state.get_service_member(&uuid, "zk-2").unwrap().unwrap();

    // Roll back to a crash after zk-1 was written: attr still Creating, no zk-2 record.
    let attr = h.state.get_service_attr(&uuid).unwrap().unwrap();
    let mut creating = attr.clone();
    creating.meta.status = ServiceStatus::Creating;
    creating.revision += 1;
    h.state.update_service_attr(&attr, &creating).unwrap();
    assert!(h.state.delete_service_member(&uuid, "zk-2").unwrap());

    assert_eq!(h.svc.create_service(&req).await.unwrap(), uuid);
    assert_eq!(status_of(&h, "zk"), ServiceStatus::Initializing);
    assert_eq!(h.svc.list_service_members("c1", "zk").unwrap().len(), 3);

    // The platform still held zk-2's volume, so the fresh one was discarded.
    let zk2 = h.state.get_service_member(&uuid, "zk-2").unwrap().unwrap();
    assert_eq!(zk2.spec.volumes.primary, old_zk2.spec.volumes.primary);
    assert_eq!(h.server.deleted_volumes().await.len(), 1);
    assert_eq!(h.server.volume_count().await, 3);
    assert_eq!(h.state.list_devices("c1").unwrap().len(), 1);
}

#[tokio::test]
async fn create_with_different_spec_is_rejected() {
    let h = harness();
    h.svc
        .create_service(&stateful_request("zk", &["zone-a", "zone-b", "zone-c"]))
        .await
        .unwrap();

    let err = h
        .svc
        .create_service(&stateful_request("zk", &["zone-a", "zone-b", "zone-c", "zone-a"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ManageError::ServiceExist(_)), "{err}");
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_any_write() {
    let h = harness();

    let mut req = stateful_request("zk", &["zone-a", "zone-b"]);
    req.replicas = 3;
    let err = h.svc.create_service(&req).await.unwrap_err();
    assert!(matches!(err, ManageError::InvalidArgs(_)));

    let mut req = stateful_request("zk", &["zone-a"]);
    req.service.cluster = "other".into();
    assert!(matches!(
        h.svc.create_service(&req).await.unwrap_err(),
        ManageError::InvalidArgs(_)
    ));

    let mut req = stateful_request("zk", &["zone-a"]);
    req.volume = None;
    assert!(matches!(
        h.svc.create_service(&req).await.unwrap_err(),
        ManageError::InvalidArgs(_)
    ));

    assert!(h.state.list_services("c1").unwrap().is_empty());
    assert!(h.state.list_devices("c1").unwrap().is_empty());
}

#[tokio::test]
async fn second_service_gets_next_device() {
    let h = harness();
    h.svc.create_service(&stateful_request("zk", &["zone-a"])).await.unwrap();
    h.svc.create_service(&stateful_request("kafka", &["zone-a"])).await.unwrap();

    let kafka = h.svc.get_service_attr("c1", "kafka").unwrap();
    assert_eq!(kafka.spec.volumes.unwrap().primary.device_name, "/dev/xvdc");
}

#[tokio::test]
async fn journal_volume_gets_its_own_device() {
    let h = harness();
    let mut req = stateful_request("kafka", &["zone-a", "zone-b"]);
    req.journal_volume = Some(VolumeSpec {
        volume_type: "io1".into(),
        size_gb: 5,
        iops: 100,
        encrypted: false,
    });
    h.svc.create_service(&req).await.unwrap();

    let vols = h.svc.get_service_attr("c1", "kafka").unwrap().spec.volumes.unwrap();
    assert_eq!(vols.primary.device_name, "/dev/xvdb");
    assert_eq!(vols.journal.unwrap().device_name, "/dev/xvdc");

    let ids = h.svc.list_service_volumes("c1", "kafka").unwrap();
    assert_eq!(ids.primary.len(), 2);
    assert_eq!(ids.journal.len(), 2);
    let members = h.svc.list_service_members("c1", "kafka").unwrap();
    let kafka0 = members.iter().find(|m| m.member_name == "kafka-0").unwrap();
    let journal_id = &kafka0.spec.volumes.journal.as_ref().unwrap().volume_id;
    assert_eq!(
        h.platform.service_volume("kafka", "kafka-0", true).await.as_ref(),
        Some(journal_id)
    );
}

#[tokio::test]
async fn stateless_service_without_replica_configs_has_no_members() {
    let h = harness();
    let req = CreateServiceRequest {
        service_type: ServiceType::Stateless,
        volume: None,
        replicas: 2,
        replica_configs: vec![],
        ..stateful_request("web", &[])
    };
    h.svc.create_service(&req).await.unwrap();

    assert_eq!(status_of(&h, "web"), ServiceStatus::Initializing);
    assert!(h.svc.list_service_members("c1", "web").unwrap().is_empty());
    assert!(h.state.list_devices("c1").unwrap().is_empty());
}

#[tokio::test]
async fn static_ip_members_are_pinned_to_zone_interfaces() {
    let h = harness();
    h.server
        .add_zone("zone-a", "10.0.1.0/24", vec![interface("eni-a", "i-a", "10.0.1.10", &[])])
        .await;
    h.server
        .add_zone("zone-b", "10.0.2.0/24", vec![interface("eni-b", "i-b", "10.0.2.10", &[])])
        .await;
    let mut req = stateful_request("redis", &["zone-a", "zone-b", "zone-a"]);
    req.require_static_ip = true;

    let uuid = h.svc.create_service(&req).await.unwrap();
    let members = h.svc.list_service_members("c1", "redis").unwrap();
    assert_eq!(members.len(), 3);
    for m in &members {
        let ip = m.spec.static_ip.as_deref().unwrap();
        let (prefix, instance) = match m.spec.availability_zone.as_str() {
            "zone-a" => ("10.0.1.", "i-a"),
            _ => ("10.0.2.", "i-b"),
        };
        assert!(ip.starts_with(prefix), "{ip}");
        assert_eq!(m.spec.server_instance_id.as_deref(), Some(instance));

        let record = dns_name(&m.member_name, &h.svc.config().domain);
        let attr = h.svc.get_service_attr("c1", "redis").unwrap();
        assert_eq!(h.dns.get_dns_record(&record, &attr.spec.hosted_zone_id).await.unwrap(), ip);
    }
    assert_eq!(h.state.list_static_ips_for_service(&uuid).unwrap().len(), 3);
    assert_eq!(h.server.assigned_ips().await.len(), 3);

    h.svc.delete_service("c1", "redis").await.unwrap();
    assert!(h.state.list_static_ips_for_service(&uuid).unwrap().is_empty());
}

// ── Status transitions ─────────────────────────────────────────────

#[tokio::test]
async fn set_initialized_requires_initializing() {
    let h = harness();
    h.state
        .create_service(&Service {
            cluster: "c1".into(),
            name: "pending".into(),
            service_uuid: "u-pending".into(),
        })
        .unwrap();
    let uuid = h.svc.create_service(&stateful_request("zk", &["zone-a"])).await.unwrap();
    let mut attr = h.state.get_service_attr(&uuid).unwrap().unwrap();
    attr.service_uuid = "u-pending".into();
    attr.meta.name = "pending".into();
    attr.meta.status = ServiceStatus::Creating;
    h.state.create_service_attr(&attr).unwrap();

    let err = h.svc.set_service_initialized("c1", "pending").await.unwrap_err();
    assert!(matches!(err, ManageError::ConditionalCheckFailed(_)));

    h.svc.set_service_initialized("c1", "zk").await.unwrap();
    assert_eq!(status_of(&h, "zk"), ServiceStatus::Active);
    // Already active is a no-op.
    h.svc.set_service_initialized("c1", "zk").await.unwrap();
    assert_eq!(status_of(&h, "zk"), ServiceStatus::Active);

    let err = h.svc.set_service_initialized("c1", "missing").await.unwrap_err();
    assert!(matches!(err, ManageError::NotFound(_)));
}

#[tokio::test]
async fn member_config_rotation_bumps_version() {
    let h = harness();
    let uuid = h.svc.create_service(&stateful_request("zk", &["zone-a"])).await.unwrap();

    let id = h.svc.update_member_config("c1", "zk", "zk-0", "zoo.cfg", "myid=9").unwrap();
    assert_eq!(config_file_version(&id.file_id), Some(1));
    let member = h.state.get_service_member(&uuid, "zk-0").unwrap().unwrap();
    assert_eq!(member.spec.configs, vec![id.clone()]);
    assert_eq!(h.state.get_config_file(&uuid, &id.file_id).unwrap().unwrap().content, "myid=9");
}

// ── Delete ─────────────────────────────────────────────────────────

#[tokio::test]
async fn delete_releases_records_and_returns_volumes() {
    let h = harness();
    let mut req = stateful_request("kafka", &["zone-a", "zone-b"]);
    req.journal_volume = Some(VolumeSpec {
        volume_type: "gp2".into(),
        size_gb: 5,
        iops: 0,
        encrypted: false,
    });
    let uuid = h.svc.create_service(&req).await.unwrap();
    let attached = h.svc.list_service_volumes("c1", "kafka").unwrap().primary[0].clone();
    h.server.attach_volume(&attached, "i-1").await.unwrap();

    let volumes = h.svc.delete_service("c1", "kafka").await.unwrap();
    assert_eq!(volumes.len(), 4);

    assert_eq!(h.server.get_volume_state(&attached).await.unwrap(), VolumeState::Available);
    assert!(h.server.deleted_volumes().await.is_empty());
    assert!(h.platform.service_volume("kafka", "kafka-0", false).await.is_none());
    assert!(h.state.list_devices("c1").unwrap().is_empty());
    assert!(h.state.list_service_members(&uuid).unwrap().is_empty());
    assert!(h.state.get_service_attr(&uuid).unwrap().is_none());
    assert_eq!(h.dns.record_count().await, 0);
    assert!(matches!(
        h.svc.get_service_uuid("c1", "kafka").unwrap_err(),
        ManageError::NotFound(_)
    ));

    for id in &volumes {
        h.svc.delete_volume(id).await.unwrap();
    }
    assert_eq!(h.server.deleted_volumes().await.len(), 4);
}

#[tokio::test]
async fn delete_finishes_after_partial_delete() {
    let h = harness();
    let uuid = h.svc.create_service(&stateful_request("zk", &["zone-a"])).await.unwrap();
    // Simulate a delete that crashed right after dropping the attr.
    h.state.delete_service_attr(&uuid).unwrap();

    assert!(h.svc.delete_service("c1", "zk").await.unwrap().is_empty());
    assert!(h.state.list_devices("c1").unwrap().is_empty());
    assert!(h.state.list_services("c1").unwrap().is_empty());
}

#[tokio::test]
async fn delete_resumes_when_attr_already_marked_deleted() {
    let h = harness();
    let uuid = h.svc.create_service(&stateful_request("zk", &["zone-a"])).await.unwrap();
    // A previous delete got as far as marking the attr Deleted.
    let attr = h.state.get_service_attr(&uuid).unwrap().unwrap();
    let deleting = attr.with_status(ServiceStatus::Deleting);
    h.state.update_service_attr(&attr, &deleting).unwrap();
    h.state
        .update_service_attr(&deleting, &deleting.with_status(ServiceStatus::Deleted))
        .unwrap();

    assert_eq!(h.svc.delete_service("c1", "zk").await.unwrap().len(), 1);
    assert!(h.state.get_service_attr(&uuid).unwrap().is_none());
    assert!(h.state.list_services("c1").unwrap().is_empty());
    assert!(h.state.list_devices("c1").unwrap().is_empty());

    let again = h.svc.create_service(&stateful_request("zk", &["zone-a"])).await.unwrap();
    assert_ne!(again, uuid);
}

#[tokio::test]
async fn deleted_name_can_be_reused() {
    let h = harness();
    let first = h.svc.create_service(&stateful_request("zk", &["zone-a"])).await.unwrap();
    h.svc.delete_service("c1", "zk").await.unwrap();
    let second = h.svc.create_service(&stateful_request("zk", &["zone-a"])).await.unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn clusters_are_listed_and_system_tables_rebuilt() {
    let h = harness();
    assert!(h.svc.list_clusters().unwrap().is_empty());
    h.svc.create_service(&stateful_request("zk", &["zone-a"])).await.unwrap();
    assert_eq!(h.svc.list_clusters().unwrap(), vec!["c1".to_string()]);

    h.svc.delete_system_tables().unwrap();
    assert!(!h.state.tables_ready().unwrap());
    h.svc.check_and_create_system_tables().await.unwrap();
    assert!(h.svc.list_clusters().unwrap().is_empty());
    assert!(h.svc.list_services("c1").unwrap().is_empty());
}

// ── Init tasks ─────────────────────────────────────────────────────

fn fast_init_config() -> InitTaskConfig {
    InitTaskConfig {
        max_tasks: 10,
        poll_interval: Duration::from_millis(5),
        service_wait: Duration::from_secs(2),
        task_wait: Duration::from_millis(200),
        stabilize_delay: Duration::from_millis(1),
        retry_count: 3,
    }
}

async fn start_platform_service(platform: &MemContainerPlatform, name: &str, uuid: &str) {
    platform
        .create_service(&ContainerServiceOptions {
            cluster: "c1".into(),
            service_name: name.into(),
            service_uuid: uuid.into(),
            container_image: name.into(),
            replicas: 1,
            resources: Resources::default(),
            env: vec![],
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn init_task_drives_service_to_active() {
    let state = StateStore::open_in_memory().unwrap();
    let hook_state = state.clone();
    let hook: RunTaskHook = Arc::new(move |opts: &RunTaskOptions| {
        let old = hook_state.get_service_attr(&opts.service_uuid).unwrap().unwrap();
        hook_state
            .update_service_attr(&old, &old.with_status(ServiceStatus::Active))
            .unwrap();
    });
    let h = harness_with(
        state.clone(),
        MemContainerPlatform::new(PlatformKind::Ecs).with_run_task_hook(hook),
    );
    let platform: Arc<dyn ContainerPlatform> = h.platform.clone();
    let scheduler = Arc::new(InitTaskScheduler::new(state, platform, fast_init_config()));
    let svc = ManageService::new(
        h.state.clone(),
        h.platform.clone(),
        h.dns.clone(),
        h.server.clone(),
        test_config(),
    )
    .with_init_tasks(scheduler.clone());

    let uuid = svc.create_service(&stateful_request("mongo", &["zone-a"])).await.unwrap();
    start_platform_service(&h.platform, "mongo", &uuid).await;
    svc.start_init_task("c1", "mongo", "mongo-init", vec![], &gen_request_id())
        .unwrap();

    for _ in 0..400 {
        if scheduler.task_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(scheduler.task_count(), 0);
    assert_eq!(svc.get_service_attr("c1", "mongo").unwrap().meta.status, ServiceStatus::Active);
    assert_eq!(h.platform.run_task_calls().await, 1);

    // Nothing to do once active.
    svc.start_init_task("c1", "mongo", "mongo-init", vec![], "req-again").unwrap();
    assert_eq!(scheduler.task_count(), 0);
}

#[tokio::test]
async fn delete_cancels_running_init_task() {
    let state = StateStore::open_in_memory().unwrap();
    let h = harness_with(
        state.clone(),
        MemContainerPlatform::new(PlatformKind::Swarm).without_auto_start(),
    );
    let platform: Arc<dyn ContainerPlatform> = h.platform.clone();
    let scheduler = Arc::new(InitTaskScheduler::new(state, platform, fast_init_config()));
    let svc = ManageService::new(
        h.state.clone(),
        h.platform.clone(),
        h.dns.clone(),
        h.server.clone(),
        test_config(),
    )
    .with_init_tasks(scheduler.clone());

    let uuid = svc.create_service(&stateful_request("mongo", &["zone-a"])).await.unwrap();
    start_platform_service(&h.platform, "mongo", &uuid).await;
    svc.start_init_task("c1", "mongo", "mongo-init", vec![], "req-1").unwrap();
    assert!(svc.init_task_status("c1", "mongo").unwrap().is_some());

    svc.delete_service("c1", "mongo").await.unwrap();
    for _ in 0..400 {
        if scheduler.task_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(scheduler.task_count(), 0);
    assert_eq!(h.platform.run_task_calls().await, 0);
    assert_eq!(h.platform.delete_task_calls().await, 1);
}

#[tokio::test]
async fn init_task_needs_initializing_service() {
    let h = harness();
    let state = h.state.clone();
    let platform: Arc<dyn ContainerPlatform> = h.platform.clone();
    let scheduler = Arc::new(InitTaskScheduler::new(state, platform, fast_init_config()));

    // Without a scheduler the call is an internal error.
    h.svc.create_service(&stateful_request("zk", &["zone-a"])).await.unwrap();
    assert!(matches!(
        h.svc.start_init_task("c1", "zk", "img", vec![], "req-1").unwrap_err(),
        ManageError::Internal(_)
    ));

    let svc = ManageService::new(
        h.state.clone(),
        h.platform.clone(),
        h.dns.clone(),
        h.server.clone(),
        test_config(),
    )
    .with_init_tasks(scheduler);
    assert!(matches!(
        svc.start_init_task("c1", "missing", "img", vec![], "req-1").unwrap_err(),
        ManageError::NotFound(_)
    ));
}
