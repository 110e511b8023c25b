//! Launch arguments per server group
//!
//! Options are collected as key/value pairs, sorted, and rendered as
//! `--key=value`. User-supplied group arguments are appended unsorted.

use super::{
    member_endpoint, RenderInput, DATABASE_PORT, DATA_MOUNT_DIR, JWT_SECRET_MOUNT_DIR,
    MASTER_JWT_MOUNT_DIR, SYNC_MASTER_PORT, SYNC_WORKER_PORT, TLS_KEYFILE_MOUNT_DIR,
};
use dbop_types::{DeploymentMode, ServerGroup};

#[derive(Debug, Default)]
struct Options(Vec<(String, String)>);

impl Options {
    fn add(&mut self, key: &str, value: impl ToString) {
        self.0.push((key.to_string(), value.to_string()));
    }

    fn into_args(mut self) -> Vec<String> {
        self.0.sort();
        self.0
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect()
    }
}

type GroupArgs = fn(&RenderInput<'_>, &str, &mut Options) -> bool;

/// Group-specific options. Returns whether agency endpoints must be added.
fn group_args(group: ServerGroup) -> GroupArgs {
    match group {
        ServerGroup::Agents => agent_args,
        ServerGroup::DbServers => dbserver_args,
        ServerGroup::Coordinators => coordinator_args,
        ServerGroup::Single => single_args,
        ServerGroup::SyncMasters | ServerGroup::SyncWorkers => no_args,
    }
}

fn no_args(_input: &RenderInput<'_>, _my_url: &str, _o: &mut Options) -> bool {
    false
}

fn agent_args(input: &RenderInput<'_>, my_url: &str, o: &mut Options) -> bool {
    o.add("--agency.disaster-recovery-id", &input.member.id);
    o.add("--agency.activate", true);
    o.add("--agency.my-address", my_url);
    o.add(
        "--agency.size",
        input.spec.group_count(ServerGroup::Agents),
    );
    o.add("--agency.supervision", true);
    o.add("--foxx.queues", false);
    o.add("--server.statistics", false);
    for peer in input.status.members.group(ServerGroup::Agents) {
        if peer.id != input.member.id {
            let host = member_endpoint(input.deployment_name, ServerGroup::Agents, peer);
            o.add(
                "--agency.endpoint",
                format!("{}://{}:{}", input.scheme(), host, DATABASE_PORT),
            );
        }
    }
    false
}

fn dbserver_args(_input: &RenderInput<'_>, my_url: &str, o: &mut Options) -> bool {
    o.add("--cluster.my-address", my_url);
    o.add("--cluster.my-role", "PRIMARY");
    o.add("--foxx.queues", false);
    o.add("--server.statistics", true);
    true
}

fn coordinator_args(input: &RenderInput<'_>, my_url: &str, o: &mut Options) -> bool {
    o.add("--cluster.my-address", my_url);
    o.add("--cluster.my-role", "COORDINATOR");
    o.add("--foxx.queues", true);
    o.add("--server.statistics", true);
    if let Some(endpoint) = &input.spec.advertised_endpoint {
        o.add("--cluster.my-advertised-endpoint", endpoint);
    }
    true
}

fn single_args(input: &RenderInput<'_>, my_url: &str, o: &mut Options) -> bool {
    o.add("--foxx.queues", true);
    o.add("--server.statistics", true);
    if input.spec.mode != DeploymentMode::ActiveFailover {
        return false;
    }
    o.add("--replication.automatic-failover", true);
    o.add("--cluster.my-address", my_url);
    o.add("--cluster.my-role", "SINGLE");
    if let Some(endpoint) = &input.spec.advertised_endpoint {
        o.add("--cluster.my-advertised-endpoint", endpoint);
    }
    true
}

/// Arguments of a database process member.
pub fn database_args(input: &RenderInput<'_>) -> Vec<String> {
    let scheme = input.scheme();
    let group_spec = input.spec.group_spec(input.group);
    let mut o = Options::default();

    o.add("--server.endpoint", format!("{scheme}://[::]:{DATABASE_PORT}"));
    if input.spec.authentication.enabled {
        o.add("--server.authentication", true);
        o.add(
            "--server.jwt-secret-keyfile",
            format!("{JWT_SECRET_MOUNT_DIR}/token"),
        );
    } else {
        o.add("--server.authentication", false);
    }
    o.add("--server.storage-engine", &input.spec.storage_engine);
    o.add("--log.level", "INFO");
    if input.spec.tls.enabled {
        o.add("--ssl.keyfile", format!("{TLS_KEYFILE_MOUNT_DIR}/tls.keyfile"));
    }
    o.add("--database.directory", DATA_MOUNT_DIR);
    o.add("--log.output", "+");

    let host = member_endpoint(input.deployment_name, input.group, input.member);
    let my_url = format!("{scheme}://{host}:{DATABASE_PORT}");
    let add_agents = group_args(input.group)(input, &my_url, &mut o);

    if add_agents {
        for agent in input.status.members.group(ServerGroup::Agents) {
            let host = member_endpoint(input.deployment_name, ServerGroup::Agents, agent);
            o.add(
                "--cluster.agency-endpoint",
                format!("{scheme}://{host}:{DATABASE_PORT}"),
            );
        }
    }

    let mut args = o.into_args();
    args.extend(group_spec.args.iter().cloned());
    args
}

/// Arguments of a sync master or worker, starting with `run master|worker`.
pub fn sync_args(input: &RenderInput<'_>) -> Vec<String> {
    let group_spec = input.spec.group_spec(input.group);
    let name = input.deployment_name;
    let mut o = Options::default();

    o.add(
        "--master.jwt-secret",
        format!("{MASTER_JWT_MOUNT_DIR}/token"),
    );

    let (run, port) = if input.group == ServerGroup::SyncMasters {
        o.add("--server.keyfile", format!("{TLS_KEYFILE_MOUNT_DIR}/tls.keyfile"));
        o.add("--mq.type", "direct");
        if input.spec.authentication.enabled {
            o.add(
                "--cluster.jwt-secret",
                format!("{JWT_SECRET_MOUNT_DIR}/token"),
            );
        }
        let scheme = if input.spec.tls.enabled { "https" } else { "http" };
        o.add(
            "--cluster.endpoint",
            format!("{scheme}://{name}:{DATABASE_PORT}"),
        );
        let master = input
            .spec
            .sync
            .master_endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{name}-sync:{SYNC_MASTER_PORT}"));
        o.add("--master.endpoint", master);
        ("master", SYNC_MASTER_PORT)
    } else {
        o.add(
            "--master.endpoint",
            format!("https://{name}-sync:{SYNC_MASTER_PORT}"),
        );
        ("worker", SYNC_WORKER_PORT)
    };

    let host = member_endpoint(name, input.group, input.member);
    o.add("--server.endpoint", format!("https://{host}:{port}"));
    o.add("--server.port", port);

    let mut args = vec!["run".to_string(), run.to_string()];
    args.extend(o.into_args());
    args.extend(group_spec.args.iter().cloned());
    args
}
