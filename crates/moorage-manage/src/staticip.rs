//! Static IP allocator.
//!
//! Services whose peers discover each other by address get one fixed
//! private IP per member. IPs live as secondary addresses on the zone's
//! network interfaces so they can follow a member to another host.
//!
//! Allocation for a zone first reuses addresses this service already holds
//! but has not handed to a member (a crashed create leaves these behind),
//! then mints new addresses from the zone subnet. All allocation runs under
//! one process-wide lock because minting touches interface state that has
//! no conditional-write primitive.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnetwork::Ipv4Network;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use moorage_core::ReplicaConfig;
use moorage_platform::{CloudServer, NetworkInterface};
use moorage_state::{ServiceAttr, ServiceMember, ServiceStaticIp, StateStore, StaticIpSpec};

use crate::error::{ManageError, ManageResult};

/// Addresses at the start of every subnet reserved by the cloud provider.
const RESERVED_PREFIX_ADDRS: u32 = 4;

/// Per-zone queues of IPs ready to hand to new members, in hand-out order.
pub type ZoneIpPools = HashMap<String, VecDeque<ServiceStaticIp>>;

pub struct StaticIpAllocator {
    state: StateStore,
    server: Arc<dyn CloudServer>,
    vpc_id: String,
    max_retry_count: u32,
    lock: Mutex<()>,
}

impl StaticIpAllocator {
    pub fn new(
        state: StateStore,
        server: Arc<dyn CloudServer>,
        vpc_id: &str,
        max_retry_count: u32,
    ) -> Self {
        Self {
            state,
            server,
            vpc_id: vpc_id.to_string(),
            max_retry_count,
            lock: Mutex::new(()),
        }
    }

    /// Build IP pools covering every replica that has no member yet.
    pub async fn create_static_ips(
        &self,
        attr: &ServiceAttr,
        replica_configs: &[ReplicaConfig],
        existing: &[ServiceMember],
    ) -> ManageResult<ZoneIpPools> {
        let _guard = self.lock.lock().await;

        let mut pending: HashMap<&str, usize> = HashMap::new();
        for cfg in replica_configs {
            *pending.entry(cfg.zone.as_str()).or_default() += 1;
        }
        let mut assigned = HashMap::new();
        for member in existing {
            let zone = member.spec.availability_zone.as_str();
            let count = pending.get_mut(zone).ok_or_else(|| {
                ManageError::Internal(format!(
                    "member {} is in zone {zone}, which has no replica config",
                    member.member_name
                ))
            })?;
            *count = count.saturating_sub(1);
            if let Some(ip) = &member.spec.static_ip {
                assigned.insert(ip.clone(), member.member_name.clone());
            }
        }

        let mut pools = ZoneIpPools::new();
        for (zone, count) in pending {
            if count == 0 {
                continue;
            }
            let ips = self
                .create_static_ips_for_zone(attr, &assigned, count, zone)
                .await?;
            pools.insert(zone.to_string(), ips.into());
        }
        Ok(pools)
    }

    async fn create_static_ips_for_zone(
        &self,
        attr: &ServiceAttr,
        assigned: &HashMap<String, String>,
        count: usize,
        zone: &str,
    ) -> ManageResult<Vec<ServiceStaticIp>> {
        let net = self
            .server
            .get_network_interfaces(&attr.meta.cluster, &self.vpc_id, zone)
            .await?;

        let mut ips = self.unassigned_ips(attr, &net.interfaces, assigned, count, zone)?;
        info!(service_uuid = %attr.service_uuid, %zone, reusable = ips.len(), needed = count, "collected unassigned ips");
        if ips.len() >= count {
            return Ok(ips);
        }
        if net.interfaces.is_empty() {
            error!(%zone, "no network interfaces to bind static ips");
            return Err(ManageError::Internal(format!("zone {zone} has no network interfaces")));
        }

        let subnet: Ipv4Network = net.cidr_block.parse().map_err(|e| {
            ManageError::Internal(format!("invalid cidr block {}: {e}", net.cidr_block))
        })?;

        let mut interfaces = net.interfaces;
        interfaces.sort_by_key(|nic| nic.private_ips.len());

        let mut used: HashSet<Ipv4Addr> = interfaces
            .iter()
            .flat_map(|nic| std::iter::once(&nic.primary_private_ip).chain(&nic.private_ips))
            .filter_map(|ip| ip.parse().ok())
            .collect();

        let mut last = subnet.network();
        for i in 0..count - ips.len() {
            let nic = &interfaces[i % interfaces.len()];
            last = self.create_next_ip(&mut used, subnet, last, nic).await?;

            let static_ip = ServiceStaticIp {
                ip: last.to_string(),
                revision: 0,
                spec: StaticIpSpec {
                    service_uuid: attr.service_uuid.clone(),
                    availability_zone: zone.to_string(),
                    server_instance_id: nic.server_instance_id.clone(),
                    network_interface_id: nic.interface_id.clone(),
                },
            };
            self.state.create_static_ip(&static_ip)?;
            info!(ip = %static_ip.ip, interface = %nic.interface_id, %zone, "static ip created");
            ips.push(static_ip);
        }
        Ok(ips)
    }

    /// IPs already bound in the zone that this service may use: ones it
    /// owns but no member holds, and ones nobody has claimed yet.
    fn unassigned_ips(
        &self,
        attr: &ServiceAttr,
        interfaces: &[NetworkInterface],
        assigned: &HashMap<String, String>,
        count: usize,
        zone: &str,
    ) -> ManageResult<Vec<ServiceStaticIp>> {
        let mut ips = Vec::new();
        for nic in interfaces {
            for ip in &nic.private_ips {
                if ips.len() >= count {
                    return Ok(ips);
                }
                if let Some(member) = assigned.get(ip) {
                    info!(%ip, %member, "ip already assigned to member");
                    continue;
                }

                match self.state.get_static_ip(ip)? {
                    Some(existing) if existing.spec.service_uuid == attr.service_uuid => {
                        ips.push(existing);
                    }
                    Some(_) => {}
                    None => {
                        let claimed = ServiceStaticIp {
                            ip: ip.clone(),
                            revision: 0,
                            spec: StaticIpSpec {
                                service_uuid: attr.service_uuid.clone(),
                                availability_zone: zone.to_string(),
                                server_instance_id: nic.server_instance_id.clone(),
                                network_interface_id: nic.interface_id.clone(),
                            },
                        };
                        match self.state.create_static_ip(&claimed) {
                            Ok(()) => {
                                info!(%ip, %zone, "claimed free ip");
                                ips.push(claimed);
                            }
                            Err(e) if e.is_conflict() => {
                                warn!(%ip, "ip claimed concurrently");
                            }
                            Err(e) => return Err(e.into()),
                        }
                    }
                }
            }
        }
        Ok(ips)
    }

    /// Bind the next free subnet address to `nic`. Another host can grab the
    /// same address between our scan and the bind, so a few candidates are tried.
    async fn create_next_ip(
        &self,
        used: &mut HashSet<Ipv4Addr>,
        subnet: Ipv4Network,
        mut last: Ipv4Addr,
        nic: &NetworkInterface,
    ) -> ManageResult<Ipv4Addr> {
        for attempt in 0..self.max_retry_count {
            let candidate = next_unused_ip(used, subnet, last).ok_or_else(|| {
                ManageError::Internal(format!("subnet {subnet} has no free addresses"))
            })?;
            used.insert(candidate);

            match self
                .server
                .assign_static_ip(&nic.interface_id, &candidate.to_string())
                .await
            {
                Ok(()) => return Ok(candidate),
                Err(e) => {
                    warn!(ip = %candidate, interface = %nic.interface_id, attempt, error = %e, "assign static ip failed");
                    last = candidate;
                }
            }
        }
        Err(ManageError::Internal(format!(
            "could not bind an ip to {} after {} attempts",
            nic.interface_id, self.max_retry_count
        )))
    }
}

/// First address after `last` that is allocatable and not in `used`.
fn next_unused_ip(used: &HashSet<Ipv4Addr>, subnet: Ipv4Network, last: Ipv4Addr) -> Option<Ipv4Addr> {
    let base = u32::from(subnet.network());
    let broadcast = subnet.broadcast();
    let mut offset = u32::from(last)
        .checked_sub(base)
        .map_or(0, |o| o.saturating_add(1))
        .max(RESERVED_PREFIX_ADDRS);
    loop {
        let ip = subnet.nth(offset)?;
        if ip == broadcast {
            return None;
        }
        if !used.contains(&ip) {
            return Some(ip);
        }
        offset = offset.checked_add(1)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moorage_core::{Resources, ServiceType};
    use moorage_platform::mem::{MemServer, interface};
    use moorage_state::{MemberMeta, MemberSpec, MemberVolumes, ServiceMeta, ServiceSpec, ServiceStatus};

    fn test_attr(uuid: &str) -> ServiceAttr {
        ServiceAttr {
            service_uuid: uuid.into(),
            revision: 0,
            meta: ServiceMeta {
                cluster: "c1".into(),
                name: "zk".into(),
                create_time: 1,
                last_modified: 1,
                service_type: ServiceType::Stateful,
                status: ServiceStatus::Creating,
            },
            spec: ServiceSpec {
                replicas: 3,
                resources: Resources::default(),
                register_dns: true,
                domain: "c1-moorage.com".into(),
                hosted_zone_id: "zone-1".into(),
                require_static_ip: true,
                service_configs: vec![],
                catalog_service_type: "zookeeper".into(),
                volumes: None,
            },
        }
    }

    fn replicas(zones: &[&str]) -> Vec<ReplicaConfig> {
        zones
            .iter()
            .map(|z| ReplicaConfig {
                zone: z.to_string(),
                configs: vec![],
            })
            .collect()
    }

    fn test_member(name: &str, zone: &str, ip: Option<&str>) -> ServiceMember {
        ServiceMember {
            service_uuid: "u1".into(),
            member_name: name.into(),
            revision: 0,
            meta: MemberMeta {
                create_time: 1,
                last_modified: 1,
            },
            spec: MemberSpec {
                availability_zone: zone.into(),
                static_ip: ip.map(str::to_string),
                volumes: MemberVolumes::default(),
                configs: vec![],
                server_instance_id: None,
            },
        }
    }

    async fn two_zone_server() -> Arc<MemServer> {
        let server = Arc::new(MemServer::new());
        server
            .add_zone(
                "zone-a",
                "10.0.1.0/24",
                vec![interface("eni-a", "i-a", "10.0.1.10", &["10.0.1.20", "10.0.1.21"])],
            )
            .await;
        server
            .add_zone(
                "zone-b",
                "10.0.2.0/24",
                vec![interface("eni-b", "i-b", "10.0.2.10", &["10.0.2.20"])],
            )
            .await;
        server
    }

    #[test]
    fn next_ip_skips_reserved_used_and_broadcast() {
        let subnet: Ipv4Network = "10.0.0.0/29".parse().unwrap();
        let mut used = HashSet::new();
        let first = next_unused_ip(&used, subnet, subnet.network()).unwrap();
        assert_eq!(first, Ipv4Addr::new(10, 0, 0, 4));

        used.insert(Ipv4Addr::new(10, 0, 0, 5));
        let next = next_unused_ip(&used, subnet, first).unwrap();
        assert_eq!(next, Ipv4Addr::new(10, 0, 0, 6));

        // .7 is the broadcast address.
        assert_eq!(next_unused_ip(&used, subnet, next), None);
    }

    #[tokio::test]
    async fn mints_only_the_shortfall_in_the_requested_zone() {
        let state = StateStore::open_in_memory().unwrap();
        let server = two_zone_server().await;
        let alloc = StaticIpAllocator::new(state.clone(), server.clone(), "vpc-1", 3);

        let pools = alloc
            .create_static_ips(&test_attr("u1"), &replicas(&["zone-a", "zone-a", "zone-a"]), &[])
            .await
            .unwrap();

        assert_eq!(pools.len(), 1);
        let zone_a: Vec<&str> = pools["zone-a"].iter().map(|ip| ip.ip.as_str()).collect();
        assert_eq!(zone_a, vec!["10.0.1.20", "10.0.1.21", "10.0.1.4"]);

        let minted = server.assigned_ips().await;
        assert_eq!(minted, vec![("zone-a".to_string(), "10.0.1.4".to_string())]);
        // Zone B's free address was left alone.
        assert!(state.get_static_ip("10.0.2.20").unwrap().is_none());
        assert_eq!(state.list_static_ips_for_service("u1").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn retry_reuses_unassigned_ips_without_minting() {
        let state = StateStore::open_in_memory().unwrap();
        let server = two_zone_server().await;
        let alloc = StaticIpAllocator::new(state.clone(), server.clone(), "vpc-1", 3);
        let attr = test_attr("u1");
        let configs = replicas(&["zone-a", "zone-a", "zone-a"]);

        let first = alloc.create_static_ips(&attr, &configs, &[]).await.unwrap();
        assert_eq!(first["zone-a"].len(), 3);

        // One member got created with the first IP before a crash.
        let existing = vec![test_member("zk-0", "zone-a", Some("10.0.1.20"))];
        let second = alloc.create_static_ips(&attr, &configs, &existing).await.unwrap();
        let ips: Vec<&str> = second["zone-a"].iter().map(|ip| ip.ip.as_str()).collect();
        assert_eq!(ips, vec!["10.0.1.21", "10.0.1.4"]);
        assert_eq!(server.assigned_ips().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_services_get_disjoint_ips() {
        let state = StateStore::open_in_memory().unwrap();
        let server = two_zone_server().await;
        let alloc = Arc::new(StaticIpAllocator::new(state.clone(), server.clone(), "vpc-1", 3));
        let configs = replicas(&["zone-a", "zone-a", "zone-a"]);

        let attr_u1 = test_attr("u1");
        let attr_u2 = test_attr("u2");
        let (a, b) = tokio::join!(
            alloc.create_static_ips(&attr_u1, &configs, &[]),
            alloc.create_static_ips(&attr_u2, &configs, &[]),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let mut all: Vec<String> = a["zone-a"]
            .iter()
            .chain(b["zone-a"].iter())
            .map(|ip| ip.ip.clone())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 6);
        assert_eq!(state.list_static_ips_for_service("u1").unwrap().len(), 3);
        assert_eq!(state.list_static_ips_for_service("u2").unwrap().len(), 3);
        // Two addresses were already on the interface; the rest were minted.
        assert_eq!(server.assigned_ips().await.len(), 4);
    }

    #[tokio::test]
    async fn ips_of_other_services_are_not_taken() {
        let state = StateStore::open_in_memory().unwrap();
        let server = two_zone_server().await;
        let alloc = StaticIpAllocator::new(state.clone(), server.clone(), "vpc-1", 3);

        let pools = alloc
            .create_static_ips(&test_attr("u1"), &replicas(&["zone-b"]), &[])
            .await
            .unwrap();
        assert_eq!(pools["zone-b"][0].ip, "10.0.2.20");

        let pools = alloc
            .create_static_ips(&test_attr("u2"), &replicas(&["zone-b"]), &[])
            .await
            .unwrap();
        assert_eq!(pools["zone-b"][0].ip, "10.0.2.4");
        assert_eq!(pools["zone-b"][0].spec.service_uuid, "u2");
    }

    #[tokio::test]
    async fn bind_race_moves_to_next_address() {
        let state = StateStore::open_in_memory().unwrap();
        let server = Arc::new(MemServer::new());
        server
            .add_zone("zone-a", "10.0.1.0/24", vec![interface("eni-a", "i-a", "10.0.1.10", &[])])
            .await;
        server.take_ip_elsewhere("10.0.1.4").await;
        let alloc = StaticIpAllocator::new(state, server.clone(), "vpc-1", 3);

        let pools = alloc
            .create_static_ips(&test_attr("u1"), &replicas(&["zone-a"]), &[])
            .await
            .unwrap();
        assert_eq!(pools["zone-a"][0].ip, "10.0.1.5");
    }

    #[tokio::test]
    async fn member_in_unknown_zone_is_internal_error() {
        let state = StateStore::open_in_memory().unwrap();
        let server = two_zone_server().await;
        let alloc = StaticIpAllocator::new(state, server, "vpc-1", 3);

        let existing = vec![test_member("zk-0", "zone-c", None)];
        let err = alloc
            .create_static_ips(&test_attr("u1"), &replicas(&["zone-a"]), &existing)
            .await
            .unwrap_err();
        assert!(matches!(err, ManageError::Internal(_)));
    }
}
