use std::io::Write;

use anyhow::{bail, Context};
use colored::Colorize;
use serde::Serialize;

use vault_migrate::{
    FileVersionMarker, MigrationOutcome, MigrationStatus, Session, VaultConfig, VersionMarker,
};
use vault_model::{IdentityModel, Node};
use vault_store::{LegacyStorage, SqliteStorage};
use vault_types::{
    Identity, Mechanism, MechanismKind, Notification, NotificationKind, OpaqueReference, Referable,
};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = VaultConfig::load(&cli.config)
        .with_context(|| format!("reading {}", cli.config.display()))?;
    let mut out = std::io::stdout().lock();
    execute(cli.command, config, cli.format, &mut out)
}

fn execute(
    command: Command,
    config: VaultConfig,
    format: OutputFormat,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match command {
        Command::Status => cmd_status(&config, format, out),
        Command::Migrate => cmd_migrate(config, format, out),
        Command::List => cmd_list(config, format, out),
        Command::Show(args) => cmd_show(config, &args.reference, format, out),
        Command::Remove(args) => cmd_remove(config, &args.reference, format, out),
        Command::Respond(args) => cmd_respond(config, &args.reference, args.approve, format, out),
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct StatusView {
    version: Option<i64>,
    legacy_entries: usize,
    identities: u64,
    mechanisms: u64,
    notifications: u64,
}

#[derive(Debug, Serialize)]
struct IdentityView {
    reference: String,
    issuer: String,
    account_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
    mechanisms: Vec<MechanismView>,
}

#[derive(Debug, Serialize)]
struct MechanismView {
    reference: String,
    uid: String,
    #[serde(rename = "type")]
    mechanism_type: String,
    detail: String,
    notifications: Vec<NotificationView>,
}

#[derive(Debug, Serialize)]
struct NotificationView {
    reference: String,
    message_id: String,
    time_added: i64,
    pending: bool,
    approved: bool,
}

impl From<&Identity> for IdentityView {
    fn from(identity: &Identity) -> Self {
        Self {
            reference: identity.opaque_reference().to_string(),
            issuer: identity.issuer().to_string(),
            account_name: identity.account_name().to_string(),
            image_url: identity.image_url().map(str::to_string),
            mechanisms: identity.mechanisms().iter().map(MechanismView::from).collect(),
        }
    }
}

impl From<&Mechanism> for MechanismView {
    fn from(mechanism: &Mechanism) -> Self {
        // Secrets never leave the store through this surface.
        let detail = match mechanism.kind() {
            MechanismKind::Oath(oath) => format!(
                "{} {} digits={} counter={} period={}",
                oath.token_type, oath.algorithm, oath.digits, oath.counter, oath.period
            ),
            MechanismKind::Push(push) => push.authentication_endpoint.clone(),
        };
        Self {
            reference: mechanism.opaque_reference().to_string(),
            uid: mechanism.uid().to_string(),
            mechanism_type: mechanism.mechanism_type().to_string(),
            detail,
            notifications: mechanism.notifications().iter().map(NotificationView::from).collect(),
        }
    }
}

impl From<&Notification> for NotificationView {
    fn from(notification: &Notification) -> Self {
        let NotificationKind::Push(push) = notification.kind();
        Self {
            reference: notification.opaque_reference().to_string(),
            message_id: push.message_id.clone(),
            time_added: notification.time_added().timestamp_millis(),
            pending: notification.is_pending(),
            approved: notification.is_approved(),
        }
    }
}

fn emit_json(out: &mut impl Write, value: &impl Serialize) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn write_identity(out: &mut impl Write, view: &IdentityView) -> anyhow::Result<()> {
    writeln!(out, "{}  {}", view.reference.cyan(), view.account_name.bold())?;
    for m in &view.mechanisms {
        write_mechanism(out, m, "  ")?;
    }
    Ok(())
}

fn write_mechanism(out: &mut impl Write, view: &MechanismView, indent: &str) -> anyhow::Result<()> {
    writeln!(
        out,
        "{indent}{}  {} {}",
        view.reference.cyan(),
        view.mechanism_type.yellow(),
        view.detail.dimmed()
    )?;
    for n in &view.notifications {
        write_notification(out, n, &format!("{indent}  "))?;
    }
    Ok(())
}

fn write_notification(out: &mut impl Write, view: &NotificationView, indent: &str) -> anyhow::Result<()> {
    let state = if view.pending {
        "pending".yellow()
    } else if view.approved {
        "approved".green()
    } else {
        "denied".red()
    };
    writeln!(out, "{indent}{}  {} {}", view.reference.cyan(), view.message_id, state)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Reads both stores and the marker as they are. Never migrates, and never
/// creates a database that is not there yet.
fn cmd_status(config: &VaultConfig, format: OutputFormat, out: &mut impl Write) -> anyhow::Result<()> {
    let marker = FileVersionMarker::new(config.version_path());
    let version = marker.read()?.map(|v| v.as_i64());
    let legacy = LegacyStorage::open(&config.legacy_path())?;
    let legacy_entries = legacy.document()?.live_slots();
    let database = config.database_path();
    let (identities, mechanisms, notifications) = if database.exists() {
        SqliteStorage::open(&database)?.counts()?
    } else {
        (0, 0, 0)
    };
    let view = StatusView {
        version,
        legacy_entries,
        identities,
        mechanisms,
        notifications,
    };

    match format {
        OutputFormat::Json => emit_json(out, &view)?,
        OutputFormat::Text => {
            let version = match view.version {
                Some(v) => format!("v{v}").bold(),
                None => "unset".dimmed(),
            };
            writeln!(out, "Storage version: {version}")?;
            writeln!(out, "Legacy entries:  {}", view.legacy_entries)?;
            writeln!(
                out,
                "Relational:      {} identities, {} mechanisms, {} notifications",
                view.identities, view.mechanisms, view.notifications
            )?;
        }
    }
    Ok(())
}

fn cmd_migrate(config: VaultConfig, format: OutputFormat, out: &mut impl Write) -> anyhow::Result<()> {
    let session = Session::open(config)?;
    let outcome = session.outcome();
    match format {
        OutputFormat::Json => emit_json(out, outcome)?,
        OutputFormat::Text => write_outcome(out, outcome)?,
    }
    Ok(())
}

fn write_outcome(out: &mut impl Write, outcome: &MigrationOutcome) -> anyhow::Result<()> {
    let status = match outcome.status {
        MigrationStatus::AlreadyCurrent => "already current".green(),
        MigrationStatus::FreshInstall => "fresh install".green(),
        MigrationStatus::Migrated => "migrated".green().bold(),
        MigrationStatus::Incomplete => "incomplete".red().bold(),
    };
    writeln!(out, "Migration: {status}")?;
    if let Some(report) = &outcome.transfer {
        writeln!(
            out,
            "  transferred: {} identities, {} mechanisms, {} notifications ({} rejected)",
            report.identities.accepted,
            report.mechanisms.accepted,
            report.notifications.accepted,
            report.rejected()
        )?;
    }
    if outcome.pruned + outcome.rekeyed + outcome.artifacts_removed + outcome.drained > 0 {
        writeln!(
            out,
            "  pruned {}, rekeyed {}, removed {}, drained {}",
            outcome.pruned, outcome.rekeyed, outcome.artifacts_removed, outcome.drained
        )?;
    }
    if !outcome.is_current() {
        writeln!(out, "  {}", "legacy entries remain; run again to resume".yellow())?;
    }
    Ok(())
}

fn cmd_list(config: VaultConfig, format: OutputFormat, out: &mut impl Write) -> anyhow::Result<()> {
    let session = Session::open(config)?;
    let views: Vec<IdentityView> = session.model().identities().iter().map(IdentityView::from).collect();
    match format {
        OutputFormat::Json => emit_json(out, &views)?,
        OutputFormat::Text if views.is_empty() => writeln!(out, "No accounts.")?,
        OutputFormat::Text => {
            for view in &views {
                write_identity(out, view)?;
            }
        }
    }
    Ok(())
}

fn resolve<'a>(model: &'a IdentityModel, text: &str) -> anyhow::Result<(OpaqueReference, Node<'a>)> {
    let reference = OpaqueReference::parse(text);
    match model.resolve(&reference) {
        Some(node) => Ok((reference, node)),
        None => bail!("no node at reference {text}"),
    }
}

fn cmd_show(config: VaultConfig, text: &str, format: OutputFormat, out: &mut impl Write) -> anyhow::Result<()> {
    let session = Session::open(config)?;
    let (_, node) = resolve(session.model(), text)?;
    match (node, format) {
        (Node::Identity(i), OutputFormat::Json) => emit_json(out, &IdentityView::from(i))?,
        (Node::Identity(i), OutputFormat::Text) => write_identity(out, &IdentityView::from(i))?,
        (Node::Mechanism(m), OutputFormat::Json) => emit_json(out, &MechanismView::from(m))?,
        (Node::Mechanism(m), OutputFormat::Text) => write_mechanism(out, &MechanismView::from(m), "")?,
        (Node::Notification(n), OutputFormat::Json) => emit_json(out, &NotificationView::from(n))?,
        (Node::Notification(n), OutputFormat::Text) => write_notification(out, &NotificationView::from(n), "")?,
    }
    Ok(())
}

fn cmd_remove(config: VaultConfig, text: &str, format: OutputFormat, out: &mut impl Write) -> anyhow::Result<()> {
    let mut session = Session::open(config)?;
    let model = session.model_mut();
    let (reference, node) = resolve(model, text)?;
    let removed = match node {
        Node::Identity(identity) => {
            let key = identity.key().clone();
            model.remove_identity(&key)?
        }
        Node::Mechanism(mechanism) => {
            let key = mechanism.key();
            model.remove_mechanism(&key)?
        }
        Node::Notification(_) => model.remove_notification(&reference)?,
    };
    report(out, format, "removed", removed, text)
}

fn cmd_respond(
    config: VaultConfig,
    text: &str,
    approve: bool,
    format: OutputFormat,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let mut session = Session::open(config)?;
    let model = session.model_mut();
    let reference = OpaqueReference::parse(text);
    if model.notification_by_reference(&reference).is_none() {
        bail!("no notification at reference {text}");
    }
    let settled = model.respond_to_notification(&reference, approve)?;
    let action = if approve { "approved" } else { "denied" };
    report(out, format, action, settled, text)
}

#[derive(Serialize)]
struct ActionView<'a> {
    action: &'a str,
    reference: &'a str,
    done: bool,
}

fn report(out: &mut impl Write, format: OutputFormat, action: &str, done: bool, reference: &str) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => emit_json(
            out,
            &ActionView {
                action,
                reference,
                done,
            },
        )?,
        OutputFormat::Text if done => writeln!(out, "{} {action} {}", "✓".green().bold(), reference.cyan())?,
        OutputFormat::Text => writeln!(out, "{} {} not {action}", "✗".red().bold(), reference.cyan())?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_types::{IdentityKey, OathMechanism, OathTokenType, PushMechanism, PushNotificationBuilder};

    fn run(config: &VaultConfig, command: Command) -> serde_json::Value {
        let mut buf = Vec::new();
        execute(command, config.clone(), OutputFormat::Json, &mut buf).unwrap();
        serde_json::from_slice(&buf).unwrap()
    }

    fn reference(text: &str) -> RefArgs {
        RefArgs {
            reference: text.to_string(),
        }
    }

    /// alice with one HOTP token and one push mechanism holding a pending notification.
    fn seeded() -> (tempfile::TempDir, VaultConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = VaultConfig::in_dir(dir.path());
        let session = Session::open(config.clone()).unwrap();
        let mut model = session.into_model();
        model.add_identity(Identity::new("ForgeRock", "alice")).unwrap().unwrap();
        let owner = IdentityKey::new("ForgeRock", "alice");
        let oath = OathMechanism::new(OathTokenType::Hotp, b"secret".to_vec());
        model
            .add_mechanism(Mechanism::new(owner.clone(), "0", MechanismKind::Oath(oath)))
            .unwrap()
            .unwrap();
        let push = PushMechanism {
            registration_endpoint: "https://am.example/reg".into(),
            authentication_endpoint: "https://am.example/auth".into(),
            secret: "s".into(),
        };
        let push_ref = model
            .add_mechanism(Mechanism::new(owner, "1", MechanismKind::Push(push)))
            .unwrap()
            .unwrap();
        let push_key = model.mechanism_by_reference(&push_ref).unwrap().key();
        model
            .add_notification(
                &push_key,
                PushNotificationBuilder::new()
                    .message_id("msg-1")
                    .challenge("c")
                    .time_added(chrono::DateTime::<chrono::Utc>::from_timestamp_millis(1_700_000_000_000).unwrap()),
            )
            .unwrap()
            .unwrap();
        (dir, config)
    }

    // -----------------------------------------------------------------------
    // Read-only commands
    // -----------------------------------------------------------------------

    #[test]
    fn status_does_not_migrate() {
        let dir = tempfile::tempdir().unwrap();
        let config = VaultConfig::in_dir(dir.path());
        let status = run(&config, Command::Status);
        assert_eq!(status["version"], serde_json::Value::Null);
        assert_eq!(status["legacy_entries"], 0);
        assert_eq!(status["mechanisms"], 0);
        assert!(!config.version_path().exists());
        assert!(!config.database_path().exists());
    }

    #[test]
    fn list_shows_tree_with_references() {
        let (_dir, config) = seeded();
        let list = run(&config, Command::List);
        let alice = &list[0];
        assert_eq!(alice["reference"], "ForgeRock:alice");
        assert_eq!(alice["mechanisms"].as_array().unwrap().len(), 2);
        let push = &alice["mechanisms"][1];
        assert_eq!(push["reference"], "ForgeRock:alice/1");
        assert_eq!(push["notifications"][0]["reference"], "ForgeRock:alice/1/1700000000000");
        assert_eq!(push["notifications"][0]["pending"], true);
        assert!(!alice["mechanisms"][0]["detail"].as_str().unwrap().contains("secret"));
    }

    #[test]
    fn show_resolves_each_level() {
        let (_dir, config) = seeded();
        let m = run(&config, Command::Show(reference("ForgeRock:alice/0")));
        assert_eq!(m["type"], "otpauth");
        let n = run(&config, Command::Show(reference("ForgeRock:alice/1/1700000000000")));
        assert_eq!(n["message_id"], "msg-1");

        let mut buf = Vec::new();
        let missing = execute(
            Command::Show(reference("ForgeRock:bob")),
            config,
            OutputFormat::Json,
            &mut buf,
        );
        assert!(missing.is_err());
    }

    // -----------------------------------------------------------------------
    // Mutating commands
    // -----------------------------------------------------------------------

    #[test]
    fn respond_settles_once() {
        let (_dir, config) = seeded();
        let args = || RespondArgs {
            reference: "ForgeRock:alice/1/1700000000000".into(),
            approve: true,
            deny: false,
        };
        assert_eq!(run(&config, Command::Respond(args()))["done"], true);
        assert_eq!(run(&config, Command::Respond(args()))["done"], false);
        let n = run(&config, Command::Show(reference("ForgeRock:alice/1/1700000000000")));
        assert_eq!(n["approved"], true);
        assert_eq!(n["pending"], false);
    }

    #[test]
    fn remove_mechanism_keeps_identity() {
        let (_dir, config) = seeded();
        assert_eq!(run(&config, Command::Remove(reference("ForgeRock:alice/1")))["done"], true);
        let status = run(&config, Command::Status);
        assert_eq!(status["identities"], 1);
        assert_eq!(status["mechanisms"], 1);
        assert_eq!(status["notifications"], 0);
        assert_eq!(status["version"], 2);
    }

    #[test]
    fn migrate_on_empty_dir_is_fresh_install() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run(&VaultConfig::in_dir(dir.path()), Command::Migrate);
        assert_eq!(outcome["status"], "fresh_install");
    }
}
