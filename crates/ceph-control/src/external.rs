use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::ExternalConfig;
use crate::control::ClusterControl;
use crate::description::ClusterDescription;
use crate::diagnostics::DiagnosticSink;
use crate::executor::{run_command, CommandExecutor};
use crate::model::{
    default_pools_only, osds_in_and_up, parse_pools, pgs_active_and_clean, Fsid, OsdDump,
    OsdRecord, PoolPlan, CANONICAL_POOLS,
};
use crate::poll::{wait_until, PollPolicy};
use crate::{ControlError, Result, ServiceType};

const SUPPORTED_SERVERS: usize = 3;
const SUPPORTED_CLUSTERS: usize = 1;

/// Drives one pre-provisioned three node cluster through its admin host.
#[derive(Debug)]
pub struct ExternalCephControl {
    description: ClusterDescription,
    config: ExternalConfig,
    poll: PollPolicy,
    executor: Box<dyn CommandExecutor>,
    sink: Arc<dyn DiagnosticSink>,
    fsid: Fsid,
    admin: String,
    bootstrapped: bool,
}

impl ExternalCephControl {
    pub fn new(
        description: ClusterDescription,
        config: ExternalConfig,
        poll: PollPolicy,
        executor: Box<dyn CommandExecutor>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self> {
        description.validate(&config.admin_role)?;
        let admin = description.admin_fqdn(&config.admin_role)?.to_owned();
        let fsid = description
            .fsid
            .clone()
            .unwrap_or_else(|| Fsid::from(config.cluster_name.as_str()));

        Ok(Self {
            description,
            config,
            poll,
            executor,
            sink,
            fsid,
            admin,
            bootstrapped: false,
        })
    }

    #[must_use]
    pub const fn fsid(&self) -> &Fsid {
        &self.fsid
    }

    #[must_use]
    pub fn admin_fqdn(&self) -> &str {
        &self.admin
    }

    async fn run(&self, target: &str, command: &str) -> Result<String> {
        run_command(&*self.executor, &*self.sink, target, command).await
    }

    /// Runs `ceph --cluster {name} {args}` on the admin host.
    async fn ceph(&self, args: &str) -> Result<String> {
        let command = format!("ceph --cluster {} {args}", self.config.cluster_name);
        self.run(&self.admin, &command).await
    }

    async fn converge(&self, what: &str, args: &str, predicate: fn(&str) -> Result<bool>) -> Result<String> {
        info!(what, "waiting for cluster state");
        wait_until(what, self.poll, || self.ceph(args), predicate).await
    }

    async fn bootstrap(&mut self) -> Result<()> {
        if self.bootstrapped {
            return Ok(());
        }

        let command = format!(
            "wget -O - http://{master}:{port}/bootstrap | sudo python ; \
             sudo sed -i 's/^[#]*open_mode:.*$/open_mode: True/;s/^[#]*log_level:.*$/log_level: debug/' /etc/salt/minion && \
             sudo killall {service} ; sudo service {service} restart",
            master = self.description.master_fqdn,
            port = self.config.bootstrap_port,
            service = self.config.agent_service,
        );

        for target in self.description.server_fqdns() {
            info!(%target, "bootstrapping management agent");
            let output = self.run(&target, &command).await?;
            info!(%target, "{}", output.trim());
        }

        self.bootstrapped = true;

        Ok(())
    }

    async fn restart_agents(&self) -> Result<()> {
        let command = format!("sudo service {} restart", self.config.agent_service);

        for target in self.description.server_fqdns() {
            let _output = self.run(&target, &command).await?;
        }

        Ok(())
    }

    async fn reset_osds(&self) -> Result<()> {
        let dump = OsdDump::parse(&self.ceph("osd dump -f json-pretty").await?)?;

        for osd in &dump.osds {
            let _output = self.ceph(&format!("osd reweight {} 1.0", osd.id)).await?;
            let _output = self.ceph(&format!("osd in {}", osd.id)).await?;
        }

        let _output = self.ceph("osd unset pause").await?;

        Ok(())
    }

    async fn reset_pools(&self) -> Result<()> {
        let existing = parse_pools(&self.ceph("osd lspools -f json-pretty").await?)?;
        let plan = PoolPlan::reconcile(&existing, CANONICAL_POOLS);

        for pool in &plan.create {
            info!(%pool, "creating missing pool");
            let _output = self
                .ceph(&format!("osd pool create {pool} {}", self.config.pool_pg_num))
                .await?;
        }

        for pool in &plan.delete {
            info!(%pool, "deleting leftover pool");
            let _output = self
                .ceph(&format!(
                    "osd pool delete {pool} {pool} --yes-i-really-really-mean-it"
                ))
                .await?;
        }

        Ok(())
    }

    fn check_fsid(&self, fsid: &Fsid) {
        if *fsid != self.fsid {
            warn!(requested = %fsid, cluster = %self.fsid, "only one cluster is managed; ignoring handle");
        }
    }
}

#[async_trait]
impl ClusterControl for ExternalCephControl {
    async fn configure(
        &mut self,
        server_count: usize,
        cluster_count: usize,
    ) -> Result<Vec<Fsid>> {
        if server_count != SUPPORTED_SERVERS || cluster_count != SUPPORTED_CLUSTERS {
            return Err(ControlError::skip(format!(
                "the external cluster provides {SUPPORTED_CLUSTERS} cluster of {SUPPORTED_SERVERS} servers, \
                 not {cluster_count} of {server_count}"
            )));
        }

        let hosts = self.description.cluster.len();
        if hosts != server_count {
            return Err(ControlError::skip(format!(
                "the cluster description lists {hosts} hosts, not {server_count}"
            )));
        }

        self.bootstrap().await?;
        self.restart_agents().await?;

        self.reset_osds().await?;
        let _dump = self
            .converge("all osds up and in", "osd dump -f json-pretty", osds_in_and_up)
            .await?;

        self.reset_pools().await?;
        let _pools = self
            .converge(
                "only the default pools",
                "osd lspools -f json-pretty",
                default_pools_only,
            )
            .await?;

        let _pgs = self
            .converge("all pgs active+clean", "pg stat", pgs_active_and_clean)
            .await?;

        info!(fsid = %self.fsid, "external cluster is in its baseline state");

        Ok(vec![self.fsid.clone()])
    }

    async fn shutdown(&mut self) -> Result<()> {
        info!(fsid = %self.fsid, "leaving external cluster running");
        Ok(())
    }

    async fn mark_osd_in(&mut self, fsid: &Fsid, osd_id: u32, osd_in: bool) -> Result<()> {
        self.check_fsid(fsid);

        let action = if osd_in { "in" } else { "out" };
        let output = self.ceph(&format!("osd {action} {osd_id}")).await?;
        info!(osd_id, action, "{}", output.trim());

        Ok(())
    }

    fn server_fqdns(&self) -> Vec<String> {
        self.description.server_fqdns()
    }

    fn fqdns(&self, fsid: &Fsid) -> Result<Vec<String>> {
        self.check_fsid(fsid);
        Ok(self.description.server_fqdns())
    }

    fn service_fqdns(&self, fsid: &Fsid, service: ServiceType) -> Result<Vec<String>> {
        self.check_fsid(fsid);
        Ok(self.description.service_fqdns(service))
    }

    async fn go_dark(&mut self, fsid: &Fsid, dark: bool, minion_id: Option<&str>) -> Result<()> {
        let action = if dark { "stop" } else { "start" };
        let command = format!("sudo service {} {action}", self.config.agent_service);

        let targets: Vec<String> = self
            .fqdns(fsid)?
            .into_iter()
            .filter(|fqdn| minion_id.map_or(true, |minion_id| fqdn.contains(minion_id)))
            .collect();

        if targets.is_empty() {
            return Err(ControlError::UnknownHost(
                minion_id.unwrap_or_default().to_owned(),
            ));
        }

        for target in &targets {
            info!(%target, action, "toggling management agent");
            let _output = self.run(target, &command).await?;
        }

        Ok(())
    }

    async fn osd_map(&self, fsid: &Fsid) -> Result<Vec<OsdRecord>> {
        self.check_fsid(fsid);
        Ok(OsdDump::parse(&self.ceph("osd dump -f json-pretty").await?)?.osds)
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use super::*;
    use crate::diagnostics::MemorySink;
    use crate::executor::scripted::ScriptedExecutor;
    use crate::executor::CommandOutput;

    const DESCRIPTION: &str = "
master_fqdn: calamari.example.com
cluster:
  ubuntu@node1.example.com:
    roles: [mon.0, osd.0, client.0]
  ubuntu@node2.example.com:
    roles: [mon.1, osd.1]
  ubuntu@node3.example.com:
    roles: [mon.2, osd.2]
";

    const OSDS_CLEAN: &str = r#"{"osds":[{"osd":0,"up":1,"in":1},{"osd":1,"up":1,"in":1},{"osd":2,"up":1,"in":1}]}"#;
    const OSDS_ONE_OUT: &str = r#"{"osds":[{"osd":0,"up":1,"in":0},{"osd":1,"up":1,"in":1},{"osd":2,"up":1,"in":1}]}"#;
    const POOLS_WITH_SCRATCH: &str = r#"[{"poolnum":0,"poolname":"data"},{"poolnum":1,"poolname":"metadata"},{"poolnum":2,"poolname":"rbd"},{"poolnum":3,"poolname":"scratch"}]"#;
    const POOLS_WITHOUT_RBD: &str = r#"[{"poolnum":0,"poolname":"data"},{"poolnum":1,"poolname":"metadata"}]"#;
    const POOLS_CLEAN: &str = r#"[{"poolnum":0,"poolname":"data"},{"poolnum":1,"poolname":"metadata"},{"poolnum":2,"poolname":"rbd"}]"#;
    const PGS_CLEAN: &str = "v99: 192 pgs: 192 active+clean; 0 bytes data, 1 GB used, 29 GB / 30 GB avail";

    fn control(executor: &ScriptedExecutor) -> ExternalCephControl {
        let description =
            ClusterDescription::from_yaml(DESCRIPTION, "inline").expect("valid description");
        let poll = PollPolicy::new(Duration::from_secs(1), Duration::from_secs(30));

        ExternalCephControl::new(
            description,
            ExternalConfig::default(),
            poll,
            Box::new(executor.clone()),
            Arc::new(MemorySink::new()),
        )
        .expect("valid backend")
    }

    fn healthy(executor: &ScriptedExecutor) {
        let _ignored = executor
            .on("osd dump", vec![CommandOutput::ok(OSDS_ONE_OUT), CommandOutput::ok(OSDS_CLEAN)])
            .on(
                "osd lspools",
                vec![CommandOutput::ok(POOLS_WITH_SCRATCH), CommandOutput::ok(POOLS_CLEAN)],
            )
            .on("pg stat", vec![CommandOutput::ok(PGS_CLEAN)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_shapes_issue_no_commands() {
        let executor = ScriptedExecutor::new();
        let mut control = control(&executor);

        for (servers, clusters) in [(1, 1), (3, 2), (4, 1), (0, 0)] {
            let err = control
                .configure(servers, clusters)
                .await
                .expect_err("only three servers in one cluster are supported");
            assert!(err.is_skip(), "({servers}, {clusters}) is skipped, got {err:?}");
        }

        assert!(executor.calls().is_empty(), "no remote command was issued");
    }

    #[tokio::test(start_paused = true)]
    async fn test_configure_normalizes_the_cluster() {
        let executor = ScriptedExecutor::new();
        healthy(&executor);
        let mut control = control(&executor);

        let fsids = control.configure(3, 1).await.expect("cluster converges");

        assert_eq!(fsids, vec![Fsid::from("ceph")], "the cluster name is the handle");
        assert_eq!(executor.count("/bootstrap"), 3, "every host is bootstrapped");
        assert_eq!(
            executor.count("sudo service salt-minion restart"),
            6,
            "bootstrap and the explicit restart both restart every agent"
        );
        assert_eq!(executor.count("osd reweight"), 3, "every osd is reweighted");
        assert_eq!(
            executor.count("ceph --cluster ceph osd in "),
            3,
            "every osd is marked in"
        );
        assert_eq!(executor.count("osd unset pause"), 1, "pause flag cleared");
        assert_eq!(
            executor.count("osd pool delete scratch scratch --yes-i-really-really-mean-it"),
            1,
            "the leftover pool is deleted"
        );
        assert_eq!(executor.count("osd pool create"), 0, "no canonical pool was missing");

        let commands = executor.commands();
        let position = |pattern: &str| {
            commands
                .iter()
                .position(|command| command.contains(pattern))
                .expect("command was issued")
        };
        assert!(position("/bootstrap") < position("osd reweight"), "bootstrap first");
        assert!(position("osd unset pause") < position("osd lspools"), "osds before pools");
        assert!(position("osd pool delete") < position("pg stat"), "pools before pgs");

        let admin_calls = executor
            .calls()
            .into_iter()
            .filter(|(_, command)| command.starts_with("ceph "))
            .all(|(target, command)| {
                target == "node1.example.com" && command.starts_with("ceph --cluster ceph ")
            });
        assert!(admin_calls, "cluster commands run on the admin host");
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_runs_once() {
        let executor = ScriptedExecutor::new();
        healthy(&executor);
        let mut control = control(&executor);

        let _fsids = control.configure(3, 1).await.expect("first configure");
        let _fsids = control.configure(3, 1).await.expect("second configure");

        assert_eq!(executor.count("/bootstrap"), 3, "bootstrap is not repeated");
        assert_eq!(
            executor.count("sudo service salt-minion restart"),
            9,
            "agents are restarted on every configure"
        );
        assert_eq!(
            executor.count("osd pool delete"),
            1,
            "a canonical pool set needs no second delete"
        );
        assert_eq!(executor.count("osd pool create"), 0, "nor any create");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_canonical_pool_is_created() {
        let executor = ScriptedExecutor::new();
        let _ignored = executor
            .on("osd dump", vec![CommandOutput::ok(OSDS_CLEAN)])
            .on(
                "osd lspools",
                vec![CommandOutput::ok(POOLS_WITHOUT_RBD), CommandOutput::ok(POOLS_CLEAN)],
            )
            .on("pg stat", vec![CommandOutput::ok(PGS_CLEAN)]);
        let mut control = control(&executor);

        let _fsids = control.configure(3, 1).await.expect("cluster converges");

        assert_eq!(
            executor.count("ceph --cluster ceph osd pool create rbd 64"),
            1,
            "the missing pool is created with the configured pg count"
        );
        assert_eq!(executor.count("osd pool create"), 1, "only rbd was missing");
        assert_eq!(executor.count("osd pool delete"), 0, "nothing to delete");
    }

    #[tokio::test(start_paused = true)]
    async fn test_osds_that_stay_out_time_out() {
        let executor = ScriptedExecutor::new();
        let _ignored = executor.on("osd dump", vec![CommandOutput::ok(OSDS_ONE_OUT)]);
        let mut control = control(&executor);

        let err = control.configure(3, 1).await.expect_err("osd 0 never comes in");

        let ControlError::Convergence {
            what, last_output, ..
        } = err
        else {
            panic!("expected a convergence failure, got {err:?}");
        };
        assert_eq!(what, "all osds up and in", "the osd poll gave up");
        assert_eq!(
            last_output.as_deref(),
            Some(OSDS_ONE_OUT),
            "the last osd dump is reported"
        );
        assert_eq!(executor.count("osd lspools"), 0, "pools are never touched");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_command_aborts() {
        let executor = ScriptedExecutor::new();
        healthy(&executor);
        let _ignored = executor.on(
            "osd unset pause",
            vec![CommandOutput {
                stdout: String::new(),
                stderr: "Error EACCES: access denied".to_owned(),
                code: 13,
            }],
        );
        let mut control = control(&executor);

        let err = control.configure(3, 1).await.expect_err("pause cannot be cleared");

        let ControlError::Command(failure) = err else {
            panic!("expected a command failure, got {err:?}");
        };
        assert_eq!(failure.code, 13, "exit status is kept");
        assert_eq!(failure.stderr, "Error EACCES: access denied", "stderr is kept");
        assert_eq!(executor.count("osd lspools"), 0, "nothing runs after the failure");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_pgs_time_out() {
        let executor = ScriptedExecutor::new();
        let _ignored = executor
            .on("osd dump", vec![CommandOutput::ok(OSDS_CLEAN)])
            .on("osd lspools", vec![CommandOutput::ok(POOLS_CLEAN)])
            .on(
                "pg stat",
                vec![CommandOutput::ok("v7: 192 pgs: 100 active+clean, 92 peering; 0 bytes data")],
            );
        let mut control = control(&executor);

        let err = control.configure(3, 1).await.expect_err("pgs never settle");

        let ControlError::Convergence {
            what, last_output, ..
        } = err
        else {
            panic!("expected a convergence failure, got {err:?}");
        };
        assert_eq!(what, "all pgs active+clean", "the pg poll gave up");
        assert!(
            last_output.is_some_and(|output| output.contains("92 peering")),
            "the last pg stat is reported"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_go_dark_selects_hosts() {
        let executor = ScriptedExecutor::new();
        let mut control = control(&executor);
        let fsid = control.fsid().clone();

        control
            .go_dark(&fsid, true, Some("node2"))
            .await
            .expect("node2 exists");
        assert_eq!(
            executor.calls(),
            vec![(
                "node2.example.com".to_owned(),
                "sudo service salt-minion stop".to_owned()
            )],
            "only the matching host is stopped"
        );

        control.go_dark(&fsid, false, None).await.expect("all hosts");
        assert_eq!(
            executor.count("sudo service salt-minion start"),
            3,
            "every host is restarted"
        );

        let err = control
            .go_dark(&fsid, true, Some("node9"))
            .await
            .expect_err("no host matches");
        assert!(
            matches!(err, ControlError::UnknownHost(ref host) if host == "node9"),
            "unmatched minion ids are rejected, got {err:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_osd_in_and_osd_map() {
        let executor = ScriptedExecutor::new();
        let _ignored = executor.on("osd dump", vec![CommandOutput::ok(OSDS_ONE_OUT)]);
        let mut control = control(&executor);
        let fsid = control.fsid().clone();

        control.mark_osd_in(&fsid, 0, false).await.expect("osd out");
        control.mark_osd_in(&fsid, 0, true).await.expect("osd in");

        assert_eq!(
            executor.commands(),
            vec![
                "ceph --cluster ceph osd out 0".to_owned(),
                "ceph --cluster ceph osd in 0".to_owned(),
            ],
            "one command per call, nothing cached"
        );

        let osds = control.osd_map(&fsid).await.expect("osd dump parses");
        assert_eq!(
            osds.first(),
            Some(&OsdRecord {
                id: 0,
                up: true,
                r#in: false,
            }),
            "osd 0 is reported out"
        );
    }

    #[test]
    fn test_explicit_fsid_is_used() {
        let description = ClusterDescription::from_yaml(
            &format!("fsid: 9f2c-explicit\n{DESCRIPTION}"),
            "inline",
        )
        .expect("valid description");
        let control = ExternalCephControl::new(
            description,
            ExternalConfig::default(),
            PollPolicy::default(),
            Box::new(ScriptedExecutor::new()),
            Arc::new(MemorySink::new()),
        )
        .expect("valid backend");

        assert_eq!(control.fsid().as_str(), "9f2c-explicit", "description fsid wins");
        assert_eq!(control.admin_fqdn(), "node1.example.com", "admin host");
    }
}
