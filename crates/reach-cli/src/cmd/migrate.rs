//! `migrate --from openclaw.json`.

use crate::cli::MigrateArgs;
use crate::context::die;
use crate::ui;
use reach_types::config::reach_home;
use serde_json::json;

pub fn cmd_migrate(args: MigrateArgs, json: bool) {
    let target_dir = reach_home();
    if !json {
        println!("Migrating from OpenClaw ({})...", args.from.display());
        if args.dry_run {
            println!("  (dry run, no changes will be made)\n");
        }
    }

    let options = reach_migrate::MigrateOptions {
        source_config: args.from,
        source_state_dir: args.state_dir,
        target_dir,
        target_state_dir: None,
        dry_run: args.dry_run,
    };

    let report = match reach_migrate::run_migration(&options) {
        Ok(report) => report,
        Err(e) => die(format!("Migration failed: {e}"), "Check the path to openclaw.json"),
    };

    if json {
        ui::print_json(&json!({
            "dryRun": report.dry_run,
            "imported": report.imported.iter().map(|i| json!({
                "kind": i.kind.to_string(),
                "name": i.name,
                "destination": i.destination,
            })).collect::<Vec<_>>(),
            "skipped": report.skipped.iter().map(|s| json!({
                "kind": s.kind.to_string(),
                "name": s.name,
                "reason": s.reason,
            })).collect::<Vec<_>>(),
            "warnings": report.warnings,
        }));
        return;
    }

    report.print_summary();
    if !args.dry_run {
        let report_path = options.target_dir.join("migration_report.md");
        if let Err(e) = std::fs::write(&report_path, report.to_markdown()) {
            ui::error(&format!("Could not save migration report: {e}"));
        } else {
            ui::kv("Report", &report_path.display().to_string());
        }
    }
}
