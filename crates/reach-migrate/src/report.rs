//! Migration report generation.

use std::fmt;

/// Summary of a migration run.
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    /// Source framework name.
    pub source: String,
    /// Items that were successfully imported.
    pub imported: Vec<MigrateItem>,
    /// Items that were skipped (with reason).
    pub skipped: Vec<SkippedItem>,
    /// Warnings generated during migration.
    pub warnings: Vec<String>,
    /// Whether this was a dry run.
    pub dry_run: bool,
}

/// A successfully imported item.
#[derive(Debug, Clone)]
pub struct MigrateItem {
    pub kind: ItemKind,
    /// Name or identifier.
    pub name: String,
    /// Destination path or config key.
    pub destination: String,
}

/// An item that was skipped.
#[derive(Debug, Clone)]
pub struct SkippedItem {
    pub kind: ItemKind,
    pub name: String,
    /// Why it was skipped.
    pub reason: String,
}

/// The type of migrated item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Config,
    Secret,
    Relay,
    Profile,
    AllowList,
    State,
}

impl ItemKind {
    pub const ALL: [ItemKind; 6] = [
        Self::Config,
        Self::Secret,
        Self::Relay,
        Self::Profile,
        Self::AllowList,
        Self::State,
    ];
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "Config"),
            Self::Secret => write!(f, "Secret"),
            Self::Relay => write!(f, "Relay"),
            Self::Profile => write!(f, "Profile"),
            Self::AllowList => write!(f, "Allow-list"),
            Self::State => write!(f, "State"),
        }
    }
}

impl MigrationReport {
    pub(crate) fn import(&mut self, kind: ItemKind, name: impl Into<String>, destination: impl Into<String>) {
        self.imported.push(MigrateItem {
            kind,
            name: name.into(),
            destination: destination.into(),
        });
    }

    pub(crate) fn skip(&mut self, kind: ItemKind, name: impl Into<String>, reason: impl Into<String>) {
        self.skipped.push(SkippedItem {
            kind,
            name: name.into(),
            reason: reason.into(),
        });
    }

    /// Generate a human-readable Markdown summary.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let mode = if self.dry_run { " (Dry Run)" } else { "" };

        out.push_str(&format!(
            "# Migration Report: {} -> agent-reach{}\n\n",
            self.source, mode
        ));

        out.push_str("## Summary\n\n");
        out.push_str(&format!("- Imported: {} items\n", self.imported.len()));
        out.push_str(&format!("- Skipped: {} items\n", self.skipped.len()));
        out.push_str(&format!("- Warnings: {}\n\n", self.warnings.len()));

        if !self.imported.is_empty() {
            out.push_str("## Imported\n\n");
            out.push_str("| Type | Name | Destination |\n");
            out.push_str("|------|------|-------------|\n");
            for item in &self.imported {
                out.push_str(&format!(
                    "| {} | {} | {} |\n",
                    item.kind, item.name, item.destination
                ));
            }
            out.push('\n');
        }

        if !self.skipped.is_empty() {
            out.push_str("## Skipped\n\n");
            out.push_str("| Type | Name | Reason |\n");
            out.push_str("|------|------|--------|\n");
            for item in &self.skipped {
                out.push_str(&format!(
                    "| {} | {} | {} |\n",
                    item.kind, item.name, item.reason
                ));
            }
            out.push('\n');
        }

        if !self.warnings.is_empty() {
            out.push_str("## Warnings\n\n");
            for w in &self.warnings {
                out.push_str(&format!("- {w}\n"));
            }
            out.push('\n');
        }

        out.push_str("## Next Steps\n\n");
        out.push_str("1. Review `~/.agent-reach/config.toml`\n");
        out.push_str("2. Consider moving the secret key to `AGENT_REACH_SECRET_KEY`\n");
        out.push_str("3. Check your identity: `agent-reach whoami`\n");
        out.push_str("4. Start the service: `agent-reach run`\n");

        out
    }

    /// Print the report to stdout, grouped by item kind.
    pub fn print_summary(&self) {
        let mode = if self.dry_run { " (dry run)" } else { "" };
        println!(
            "\n  OpenClaw import{mode}: {} imported, {} skipped\n",
            self.imported.len(),
            self.skipped.len()
        );

        for kind in ItemKind::ALL {
            let imported: Vec<&MigrateItem> =
                self.imported.iter().filter(|i| i.kind == kind).collect();
            let skipped: Vec<&SkippedItem> =
                self.skipped.iter().filter(|i| i.kind == kind).collect();
            if imported.is_empty() && skipped.is_empty() {
                continue;
            }
            println!("  {kind}");
            for item in imported {
                println!("    + {} -> {}", item.name, item.destination);
            }
            for item in skipped {
                println!("    - {} ({})", item.name, item.reason);
            }
        }

        for w in &self.warnings {
            println!("  ! {w}");
        }
        println!();
    }
}
