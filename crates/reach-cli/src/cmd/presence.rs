//! `publish`, `heartbeat`, `update`.

use crate::cli::UpdateArgs;
use crate::context::{self, die, Session};
use crate::ui;
use reach_kernel::service::CardUpdate;
use reach_types::{LocalCardState, Status};
use reach_wire::PublishReport;
use serde_json::json;
use std::path::PathBuf;

fn print_report(what: &str, report: &PublishReport, json: bool) {
    if json {
        ui::print_json(&json!({
            "eventId": report.event_id,
            "accepted": report.accepted(),
            "relays": report
                .outcomes
                .iter()
                .map(|o| json!({ "url": o.url, "ok": o.ok, "message": o.message }))
                .collect::<Vec<_>>(),
        }));
        return;
    }
    if report.any_accepted() {
        ui::success(&format!(
            "{what} accepted by {}/{} relays",
            report.accepted(),
            report.outcomes.len()
        ));
    } else {
        ui::error(&format!("{what} was rejected by every relay"));
    }
    for outcome in &report.outcomes {
        if outcome.ok {
            ui::kv_ok(&outcome.url, "ok");
        } else {
            ui::kv_warn(&outcome.url, &outcome.message);
        }
    }
}

pub fn cmd_publish(config: Option<PathBuf>, json: bool) {
    let session = Session::open(config);
    let store = context::state_dir(&session.config).card_store();
    let rt = context::runtime();
    rt.block_on(async {
        let state = store.load().await;
        match session.publisher.publish_service_card(&state).await {
            Ok(report) => print_report("Service card", &report, json),
            Err(e) => die(e, "Check your profile settings"),
        }
        session.pool.disconnect().await;
    });
}

pub fn cmd_heartbeat(config: Option<PathBuf>, status: &str, json: bool) {
    let status: Status = match status.parse() {
        Ok(s) => s,
        Err(e) => die(e, "Use one of: available, busy, maintenance"),
    };
    let session = Session::open(config);
    let rt = context::runtime();
    rt.block_on(async {
        match session.publisher.send_heartbeat(status).await {
            Ok(report) => print_report(&format!("Heartbeat ({status})"), &report, json),
            Err(e) => die(e, "Check your identity configuration"),
        }
        session.pool.disconnect().await;
    });
}

fn card_update(args: UpdateArgs) -> CardUpdate {
    let capabilities = if args.clear_capabilities {
        Some(Vec::new())
    } else if args.capabilities.is_empty() {
        None
    } else {
        Some(args.capabilities)
    };
    let online = match (args.online, args.offline) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    };
    CardUpdate {
        capabilities,
        name: args.name,
        about: args.about,
        heartbeat_interval_ms: args.interval_ms,
        online,
    }
}

/// One-shot presence change: a single heartbeat marks the transition since
/// no timer outlives this process.
fn transition_status(before: &LocalCardState, after: &LocalCardState) -> Option<Status> {
    match (before.is_online(), after.is_online()) {
        (true, false) => Some(Status::Maintenance),
        (false, true) => Some(Status::Available),
        _ => None,
    }
}

pub fn cmd_update(config: Option<PathBuf>, args: UpdateArgs, json: bool) {
    let update = card_update(args);
    let session = Session::open(config);
    let store = context::state_dir(&session.config).card_store();
    let rt = context::runtime();
    rt.block_on(async {
        let before = store.load().await;
        let after = update.apply(&before);

        if let Err(e) = store.save(&after).await {
            die(e, &format!("Check permissions on {}", store.path().display()));
        }
        if let Some(status) = transition_status(&before, &after) {
            if let Err(e) = session.publisher.send_heartbeat(status).await {
                ui::error(&format!("Heartbeat failed: {e}"));
            }
        }
        let report = match session.publisher.publish_service_card(&after).await {
            Ok(r) => r,
            Err(e) => die(e, "Check your profile settings"),
        };

        if json {
            ui::print_json(&json!({
                "capabilities": after.capabilities,
                "online": after.is_online(),
                "heartbeatIntervalMs": after.heartbeat_interval().as_millis() as u64,
                "eventId": report.event_id,
                "accepted": report.accepted(),
            }));
        } else {
            ui::success(&format!(
                "Service card updated. Capabilities: {}",
                after.capability_summary()
            ));
            ui::kv("Presence", &ui::presence(after.is_online()));
            ui::kv(
                "Relays",
                &format!("{}/{} accepted", report.accepted(), report.outcomes.len()),
            );
            if after.is_online() {
                ui::hint("Periodic heartbeats only run under `agent-reach run`");
            }
        }
        session.pool.disconnect().await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> UpdateArgs {
        UpdateArgs {
            capabilities: Vec::new(),
            clear_capabilities: false,
            name: None,
            about: None,
            interval_ms: None,
            online: false,
            offline: false,
        }
    }

    #[test]
    fn update_leaves_unset_fields_alone() {
        let update = card_update(args());
        assert!(update.capabilities.is_none());
        assert!(update.online.is_none());
    }

    #[test]
    fn clear_capabilities_empties_the_list() {
        let mut a = args();
        a.clear_capabilities = true;
        a.offline = true;
        let update = card_update(a);
        assert_eq!(update.capabilities, Some(Vec::new()));
        assert_eq!(update.online, Some(false));
    }

    #[test]
    fn transitions_map_to_single_heartbeat() {
        let online = LocalCardState::default();
        let offline = LocalCardState {
            online: Some(false),
            ..Default::default()
        };
        assert_eq!(transition_status(&online, &offline), Some(Status::Maintenance));
        assert_eq!(transition_status(&offline, &online), Some(Status::Available));
        assert_eq!(transition_status(&online, &online), None);
    }
}
