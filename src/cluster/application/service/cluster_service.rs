use crate::{
    cluster::application::{
        request::cluster_start_request::{ClusterStartRequest, PORT_STRIDE},
        response::cluster_response::{
            ClusterStartOutcome, JoinOutcome, MemberUnseal, RemoveOutcome,
        },
    },
    core::{
        domain::{
            error::{DevbaoError, DevbaoResult, ResultExt, ValidationError},
            model::{
                api_types::RaftJoinRequest, cluster::Cluster, instance_config::ConfigOption,
                listener::Listener, node::Node, storage::Storage,
            },
            value_object::{BindAddress, validate_entity_name},
        },
        infrastructure::{
            poll::{Probe, poll_until},
            workspace::Workspace,
        },
    },
    lifecycle::application::{
        response::node_response::{CleanOutcome, ResumeOutcome},
        service::node_service::NodeService,
    },
};
use tracing::{debug, info, warn};
use url::Url;

const CLUSTER_TARGET: &str = "devbao::cluster";

/// Maintains HA cluster membership on top of [`NodeService`].
///
/// A cluster record lists its members in join order; each member node
/// carries the cluster's name as its tag. A node tagged with a cluster but
/// not listed by it is a join that was interrupted after the Raft join
/// succeeded; [`join`](Self::join) completes it.
#[derive(Clone)]
pub struct ClusterService {
    nodes: NodeService,
}

impl ClusterService {
    pub fn new(nodes: NodeService) -> Self {
        Self { nodes }
    }

    fn workspace(&self) -> &Workspace {
        self.nodes.workspace()
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.workspace().cluster_exists(name).await
    }

    pub async fn list(&self) -> DevbaoResult<Vec<String>> {
        self.workspace().list_clusters().await
    }

    /// Creates a cluster whose only member is `founder`.
    ///
    /// The founder must be a running, initialized production node using
    /// clustered storage; no remote call is made here. With `overwrite`, an
    /// existing record of the same name is replaced and the tags of its
    /// previous members are cleared.
    pub async fn form(&self, name: &str, founder: &str, overwrite: bool) -> DevbaoResult<Cluster> {
        validate_entity_name("cluster", name)?;
        if !overwrite && self.exists(name).await {
            return Err(DevbaoError::StateConflict(format!(
                "refusing to overwrite existing cluster {name}"
            )));
        }

        let mut node = self.nodes.load(founder).await?;
        if node.is_dev() {
            return Err(ValidationError::ConstraintViolation(format!(
                "node {founder} runs in dev mode; ephemeral nodes cannot be added to clusters"
            ))
            .into());
        }
        if !node.cluster.is_empty() && !(overwrite && node.cluster == name) {
            return Err(DevbaoError::StateConflict(format!(
                "node {founder} is already a member of cluster {}",
                node.cluster
            )));
        }
        if !node.config.storage.as_ref().is_some_and(|s| s.is_clustered()) {
            return Err(ValidationError::ConstraintViolation(format!(
                "node {founder} does not use raft storage and cannot form a cluster"
            ))
            .into());
        }

        if overwrite {
            self.release_previous_members(name, founder).await;
        }

        let cluster = Cluster::new(name, founder)?;
        node.cluster = name.to_string();
        self.nodes.save(&node).await?;
        self.workspace()
            .write_cluster(&cluster)
            .await
            .with_context(|| format!("saving cluster {name}"))?;
        info!(target: CLUSTER_TARGET, cluster = %name, founder = %founder, "formed cluster");
        Ok(cluster)
    }

    async fn release_previous_members(&self, name: &str, founder: &str) {
        let Ok(previous) = self.workspace().read_cluster(name).await else {
            return;
        };
        for member in previous.nodes.iter().filter(|m| *m != founder) {
            if let Ok(mut node) = self.nodes.load(member).await {
                if node.cluster == name {
                    node.cluster.clear();
                    if let Err(e) = self.nodes.save(&node).await {
                        warn!(target: CLUSTER_TARGET, cluster = %name, node = %member, error = %e, "unable to release previous member");
                    }
                }
            }
        }
    }

    /// Loads a cluster and checks that every listed member exists and is
    /// tagged with this cluster.
    pub async fn load(&self, name: &str) -> DevbaoResult<Cluster> {
        validate_entity_name("cluster", name)?;
        let cluster = self
            .workspace()
            .read_cluster(name)
            .await
            .with_context(|| format!("loading cluster {name}"))?;
        cluster
            .validate()
            .with_context(|| format!("validating cluster {name}"))?;
        if cluster.name != name {
            return Err(DevbaoError::Consistency(format!(
                "cluster record {name} is named {}",
                cluster.name
            )));
        }

        for member in &cluster.nodes {
            let node = self.nodes.load(member).await.map_err(|e| {
                if e.is_not_found() {
                    DevbaoError::Consistency(format!(
                        "cluster {name} lists node {member}, which does not exist"
                    ))
                } else {
                    e
                }
            })?;
            if node.cluster != name {
                return Err(DevbaoError::Consistency(format!(
                    "cluster {name} lists node {member}, but the node is tagged with cluster {:?}",
                    node.cluster
                )));
            }
        }
        Ok(cluster)
    }

    /// Returns the first member, in list order, that reports itself as the
    /// active leader.
    pub async fn find_leader(&self, cluster: &Cluster) -> DevbaoResult<Node> {
        let mut errors = Vec::new();
        for (index, member) in cluster.nodes.iter().enumerate() {
            let node = match self.nodes.load(member).await {
                Ok(node) => node,
                Err(e) => {
                    errors.push(format!("node {index}/{member}: {e}"));
                    continue;
                }
            };
            let leader = match self.nodes.client(&node) {
                Ok(client) => client.leader().await,
                Err(e) => Err(e),
            };
            match leader {
                Ok(status) if status.is_self => {
                    debug!(target: CLUSTER_TARGET, cluster = %cluster.name, leader = %member, "found leader");
                    return Ok(node);
                }
                Ok(_) => errors.push(format!("node {index}/{member}: not the active node")),
                Err(e) => errors.push(format!("node {index}/{member}: {e}")),
            }
        }
        Err(DevbaoError::NoLeader {
            cluster: cluster.name.clone(),
            errors,
        })
    }

    /// Retries [`find_leader`](Self::find_leader) with backoff until a leader
    /// is elected or the stabilization budget is spent.
    pub async fn wait_for_leader(&self, cluster: &Cluster) -> DevbaoResult<Node> {
        poll_until(
            &self.nodes.settings().stabilize,
            &format!("a leader in cluster {}", cluster.name),
            || async move {
                Ok::<_, DevbaoError>(match self.find_leader(cluster).await {
                    Ok(leader) => Probe::Ready(leader),
                    Err(e) => Probe::Pending(e.to_string()),
                })
            },
        )
        .await
    }

    /// Adds `candidate` to the cluster through a Raft join against the
    /// current leader.
    ///
    /// Seal configurations are compared before anything is sent. The
    /// candidate receives the leader's token and unseal keys and is tagged
    /// only after the Raft join succeeded; it is appended to the member list
    /// last, once it reports unsealed.
    pub async fn join(&self, cluster_name: &str, candidate: &str) -> DevbaoResult<JoinOutcome> {
        let mut cluster = self.load(cluster_name).await?;
        let mut node = self.nodes.load(candidate).await?;

        if node.is_dev() {
            return Err(ValidationError::ConstraintViolation(format!(
                "node {candidate} runs in dev mode; ephemeral nodes cannot join clusters"
            ))
            .into());
        }
        let tagged = node.cluster == cluster.name;
        if !node.cluster.is_empty() && !tagged {
            return Err(DevbaoError::StateConflict(format!(
                "node {candidate} is already a member of cluster {}",
                node.cluster
            )));
        }
        if tagged && cluster.contains(candidate) {
            return Ok(JoinOutcome::AlreadyMember);
        }

        let leader = self
            .find_leader(&cluster)
            .await
            .context("finding leader")?;
        check_seals(&leader, &node)?;

        let joined = if tagged {
            info!(target: CLUSTER_TARGET, cluster = %cluster.name, node = %candidate, "completing interrupted join");
            false
        } else {
            let request = self.join_request(&leader).await?;
            let response = self
                .nodes
                .client(&node)?
                .raft_join(&request)
                .await
                .with_context(|| {
                    format!(
                        "joining node {candidate} to cluster {} through leader {}",
                        cluster.name, leader.name
                    )
                })?;
            debug!(target: CLUSTER_TARGET, node = %candidate, joined = response.joined, "raft join answered");
            response.joined
        };

        node.token = leader.token.clone();
        node.unseal_keys = leader.unseal_keys.clone();
        node.cluster = cluster.name.clone();
        self.nodes.save(&node).await?;

        // Shamir-sealed followers always need the leader's key shares.
        if !joined || node.config.seals.is_empty() {
            self.nodes.wait_until_responsive(&node).await?;
            self.nodes
                .unseal(&node)
                .await
                .with_context(|| format!("unsealing follower {candidate}"))?;
        }
        self.nodes.wait_until_unsealed(&node).await?;

        cluster.nodes.push(candidate.to_string());
        self.workspace()
            .write_cluster(&cluster)
            .await
            .with_context(|| format!("saving cluster {}", cluster.name))?;
        info!(target: CLUSTER_TARGET, cluster = %cluster.name, node = %candidate, "node joined");
        Ok(JoinOutcome::Joined { resumed: tagged })
    }

    async fn join_request(&self, leader: &Node) -> DevbaoResult<RaftJoinRequest> {
        let directory = self.nodes.directory(&leader.name);
        let leader_api_addr = leader.connect_url(&directory)?;
        let ca_path = leader
            .connect_info(&directory)
            .ok()
            .filter(|info| info.tls)
            .and_then(|info| info.ca_path);
        let leader_ca_cert = match ca_path {
            Some(path) => Some(
                tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| DevbaoError::io(&path, e))?,
            ),
            None => None,
        };
        Ok(RaftJoinRequest {
            leader_api_addr,
            retry: true,
            leader_ca_cert,
        })
    }

    /// Removes a member from the live Raft configuration and from the
    /// cluster record.
    ///
    /// The member's API address is mapped to its cluster address through the
    /// leader's HA status. A member the live cluster does not know is only
    /// dropped locally.
    pub async fn remove(&self, cluster_name: &str, member: &str) -> DevbaoResult<RemoveOutcome> {
        let mut cluster = self.load(cluster_name).await?;
        if !cluster.contains(member) {
            return Err(DevbaoError::StateConflict(format!(
                "node {member} is not a member of cluster {cluster_name}"
            )));
        }
        let mut node = self.nodes.load(member).await?;

        let leader = self
            .find_leader(&cluster)
            .await
            .context("finding leader")?;
        let leader_client = self.nodes.client(&leader)?;
        let member_url = node.connect_url(&self.nodes.directory(member))?;

        let status = leader_client
            .ha_status()
            .await
            .context("reading HA status")?;
        let cluster_address = status
            .nodes
            .iter()
            .find(|n| n.api_address.trim_end_matches('/') == member_url.trim_end_matches('/'))
            .map(|n| n.cluster_address.clone());

        let outcome = match cluster_address {
            None => {
                warn!(target: CLUSTER_TARGET, cluster = %cluster_name, node = %member, "member unknown to the live cluster, dropping it locally");
                RemoveOutcome::Stale
            }
            Some(address) => {
                let configuration = leader_client
                    .raft_configuration()
                    .await
                    .context("reading raft configuration")?;
                let authority = transport_authority(&address);
                let raft_id = configuration
                    .servers
                    .iter()
                    .find(|s| !s.address.is_empty() && s.address == authority)
                    .map(|s| s.node_id.clone())
                    .ok_or_else(|| {
                        DevbaoError::Consistency(format!(
                            "no raft server matches cluster address {address} of node {member}"
                        ))
                    })?;
                leader_client
                    .raft_remove_peer(&raft_id)
                    .await
                    .with_context(|| format!("removing node {member} from cluster {cluster_name}"))?;
                RemoveOutcome::Removed { raft_id }
            }
        };

        node.cluster.clear();
        self.nodes.save(&node).await?;
        cluster.remove_member(member);
        self.workspace()
            .write_cluster(&cluster)
            .await
            .with_context(|| format!("saving cluster {cluster_name}"))?;
        info!(target: CLUSTER_TARGET, cluster = %cluster_name, node = %member, "removed member");
        Ok(outcome)
    }

    pub async fn unseal_all(&self, name: &str) -> DevbaoResult<Vec<MemberUnseal>> {
        let cluster = self.load(name).await?;
        let mut results = Vec::new();
        for (index, member) in cluster.nodes.iter().enumerate() {
            let node = self.nodes.load(member).await?;
            let unsealed = self
                .nodes
                .unseal(&node)
                .await
                .with_context(|| format!("unsealing node {index}/{member}"))?;
            results.push(MemberUnseal {
                node: member.clone(),
                unsealed,
            });
        }
        Ok(results)
    }

    /// Resumes every member that is not running.
    pub async fn resume_all(&self, name: &str) -> DevbaoResult<ResumeOutcome> {
        let cluster = self.load(name).await?;
        let mut outcome = ResumeOutcome::default();
        for (index, member) in cluster.nodes.iter().enumerate() {
            let mut node = self.nodes.load(member).await?;
            if self.nodes.is_running(&node) {
                debug!(target: CLUSTER_TARGET, node = %member, "already running");
                continue;
            }
            let resumed = self
                .nodes
                .resume(&mut node)
                .await
                .with_context(|| format!("resuming node {index}/{member}"))?;
            outcome.warnings.extend(resumed.warnings);
        }
        Ok(outcome)
    }

    /// Force-cleans every member, including interrupted joins, then deletes
    /// the cluster record. With `force`, an unreadable record is tolerated.
    pub async fn clean(&self, name: &str, force: bool) -> DevbaoResult<CleanOutcome> {
        validate_entity_name("cluster", name)?;
        let mut outcome = CleanOutcome::default();

        let mut members = match self.workspace().read_cluster(name).await {
            Ok(cluster) => cluster.nodes,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) if force => {
                outcome
                    .warnings
                    .push(format!("ignoring unreadable record of cluster {name}: {e}"));
                Vec::new()
            }
            Err(e) => return Err(e).context("loading cluster to clean"),
        };
        for candidate in self.workspace().list_nodes().await? {
            if members.contains(&candidate) {
                continue;
            }
            if let Ok(node) = self.workspace().read_node(&candidate).await {
                if node.cluster == name {
                    members.push(candidate);
                }
            }
        }

        for member in &members {
            let cleaned = self
                .nodes
                .clean(member, true)
                .await
                .with_context(|| format!("cleaning member {member}"))?;
            outcome.warnings.extend(cleaned.warnings);
        }

        outcome.removed = self.workspace().remove_cluster_dir(name).await?;
        info!(target: CLUSTER_TARGET, cluster = %name, members = members.len(), "cleaned cluster");
        Ok(outcome)
    }

    /// Builds and starts `count` raft nodes, initializes and unseals the
    /// first, forms the cluster from it and joins the rest in order.
    pub async fn start(
        &self,
        request: &ClusterStartRequest,
        overwrite: bool,
    ) -> DevbaoResult<ClusterStartOutcome> {
        validate_entity_name("cluster", &request.name)?;
        if request.count == 0 {
            return Err(
                ValidationError::field("count", "a cluster needs at least one node").into(),
            );
        }
        if self.exists(&request.name).await {
            if !overwrite {
                return Err(DevbaoError::StateConflict(format!(
                    "refusing to overwrite existing cluster {}",
                    request.name
                )));
            }
            self.clean(&request.name, true).await?;
        }
        if request.count % 2 == 0 {
            warn!(target: CLUSTER_TARGET, count = request.count, "an odd number of nodes is suggested for an HA cluster");
        }

        let addresses = (0..request.count)
            .map(|index| {
                let port = u16::try_from(index)
                    .ok()
                    .and_then(|i| i.checked_mul(PORT_STRIDE))
                    .and_then(|offset| request.base_port.checked_add(offset))
                    .ok_or_else(|| {
                        ValidationError::field(
                            "port",
                            format!("no port left for node {index} above {}", request.base_port),
                        )
                    })?;
                BindAddress::new(request.listen.clone(), port)
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;

        let mut members = Vec::with_capacity(request.count);
        for (index, address) in addresses.into_iter().enumerate() {
            let name = request.node_name(index);

            let mut options = vec![
                ConfigOption::Storage(Storage::Raft),
                ConfigOption::Listener(Listener::tcp(address.to_string())),
            ];
            options.extend(request.seals.iter().cloned().map(ConfigOption::Seal));

            info!(target: CLUSTER_TARGET, cluster = %request.name, node = %name, %address, "starting node");
            let mut node = self.nodes.build(&name, request.product, options).await?;
            self.nodes.start(&mut node).await?;

            if index == 0 {
                self.nodes.initialize(&mut node).await?;
                if node.config.seals.is_empty() {
                    self.nodes.unseal(&node).await?;
                }
                self.nodes.wait_until_unsealed(&node).await?;
            }
            members.push(node.name);
        }

        let mut cluster = self.form(&request.name, &members[0], overwrite).await?;
        for member in &members[1..] {
            self.wait_for_leader(&cluster).await?;
            self.join(&request.name, member)
                .await
                .with_context(|| format!("joining node {member}"))?;
        }

        cluster = self.load(&request.name).await?;
        let leader = self.wait_for_leader(&cluster).await?;
        info!(target: CLUSTER_TARGET, cluster = %request.name, leader = %leader.name, "cluster started");
        Ok(ClusterStartOutcome {
            cluster: cluster.name,
            nodes: members,
            leader,
        })
    }
}

/// `host:port` of a cluster address such as `https://10.0.0.2:8201`, the
/// form Raft reports its servers in.
fn transport_authority(address: &str) -> String {
    match Url::parse(address) {
        Ok(url) => match (url.host_str(), url.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            _ => address.to_string(),
        },
        Err(_) => address.to_string(),
    }
}

/// Requires the candidate's seals to match the leader's one by one.
///
/// Seals are compared by identity, which leaves out tokens and key material.
pub fn check_seals(leader: &Node, candidate: &Node) -> Result<(), ValidationError> {
    let expected = &leader.config.seals;
    let actual = &candidate.config.seals;
    if expected.len() != actual.len() {
        return Err(ValidationError::ConstraintViolation(format!(
            "mismatched seal configuration counts between {} ({}) and {} ({}); ensure seals are configured identically and retry",
            leader.name,
            expected.len(),
            candidate.name,
            actual.len()
        )));
    }
    for (index, (ours, theirs)) in expected.iter().zip(actual).enumerate() {
        if ours.identity() != theirs.identity() {
            return Err(ValidationError::ConstraintViolation(format!(
                "seal {index} of {} does not match seal {index} of leader {}",
                candidate.name, leader.name
            )));
        }
    }
    Ok(())
}
