//! Health probe settings per probe kind

use dbop_types::{ProbeKind, ProbeSpec};

struct ProbeTiming {
    path: &'static str,
    initial_delay_secs: u32,
    period_secs: u32,
    timeout_secs: u32,
    failure_threshold: u32,
}

fn timing(kind: ProbeKind) -> ProbeTiming {
    match kind {
        ProbeKind::Version => ProbeTiming {
            path: "/_api/version",
            initial_delay_secs: 30,
            period_secs: 10,
            timeout_secs: 2,
            failure_threshold: 10,
        },
        ProbeKind::Availability => ProbeTiming {
            path: "/_admin/server/availability",
            initial_delay_secs: 2,
            period_secs: 2,
            timeout_secs: 2,
            failure_threshold: 10,
        },
        ProbeKind::SimpleAvailability => ProbeTiming {
            path: "/_api/version",
            initial_delay_secs: 15,
            period_secs: 10,
            timeout_secs: 2,
            failure_threshold: 10,
        },
        ProbeKind::SyncVersion => ProbeTiming {
            path: "/_api/version",
            initial_delay_secs: 15,
            period_secs: 10,
            timeout_secs: 2,
            failure_threshold: 10,
        },
    }
}

/// Probe for a container listening on `port`. Sync probes are always secure.
pub fn probe_spec(kind: ProbeKind, port: u16, secure: bool) -> ProbeSpec {
    let t = timing(kind);
    ProbeSpec {
        path: t.path.to_string(),
        port,
        secure: secure || kind == ProbeKind::SyncVersion,
        initial_delay_secs: t.initial_delay_secs,
        period_secs: t.period_secs,
        timeout_secs: t.timeout_secs,
        failure_threshold: t.failure_threshold,
    }
}
