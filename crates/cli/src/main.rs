use anyhow::{bail, Context};
use chrono::{DateTime, FixedOffset, Local, NaiveDate};
use clap::{Parser, Subcommand};
use fhir::{PlanDefinition, PlanTemplate, Resource};
use isacc_core::constants::{
    ENV_CAREPLAN_DURATION_DAYS, ENV_CAREPLAN_TEMPLATE, ENV_FILL_DEFAULT_CONSENTS,
    ENV_USER_ID_SYSTEM, ENV_WELCOME_MESSAGE,
};
use isacc_core::{
    generate_message_drafts, CarePlanSession, InMemoryStore, Replacements, SessionConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "isacc")]
#[command(about = "ISACC care plan messaging CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the message schedule a plan definition produces
    Schedule {
        /// PlanDefinition JSON file (defaults to the bundled schedule)
        #[arg(long)]
        plan: Option<PathBuf>,
        /// Patient birth date (YYYY-MM-DD)
        #[arg(long)]
        birth_date: Option<NaiveDate>,
        /// Value for the {name} placeholder
        #[arg(long)]
        name: Option<String>,
        /// Value for the {userName} placeholder
        #[arg(long)]
        sender: Option<String>,
        /// Schedule start as RFC 3339 (defaults to now, local offset)
        #[arg(long)]
        start: Option<String>,
    },
    /// Run a full session load against records read from a JSON file
    Load {
        /// JSON array of resources, or a FHIR Bundle
        records: PathBuf,
        /// Login identifier of the user to load
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("isacc=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Schedule {
            plan,
            birth_date,
            name,
            sender,
            start,
        } => {
            let template = load_template(plan.as_deref())?;
            let now = match start {
                Some(raw) => DateTime::parse_from_rfc3339(&raw)
                    .with_context(|| format!("invalid --start timestamp '{raw}'"))?,
                None => Local::now().fixed_offset(),
            };
            print_schedule(&template, birth_date, name, sender, now)?;
        }
        Commands::Load { records, user } => {
            let config = session_config_from_env()?;
            let resources = read_resources(&records)?;
            tracing::info!(records = resources.len(), "seeded in-memory store");
            let store = Arc::new(InMemoryStore::with_resources(resources));
            let session = CarePlanSession::new(Arc::new(config), store);

            if let Err(e) = session.set_user(&user).await {
                eprintln!("Error loading session: {}", e);
            }
            print_snapshot(&session.snapshot());
        }
    }

    Ok(())
}

fn load_template(path: Option<&Path>) -> anyhow::Result<PlanTemplate> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Ok(PlanDefinition::parse(&json)?)
        }
        None => Ok(PlanDefinition::default_schedule()?),
    }
}

fn print_schedule(
    template: &PlanTemplate,
    birth_date: Option<NaiveDate>,
    name: Option<String>,
    sender: Option<String>,
    now: DateTime<FixedOffset>,
) -> anyhow::Result<()> {
    let mut replacements = Replacements::new();
    if let Some(name) = name {
        replacements.insert("name".into(), name);
    }
    if let Some(sender) = sender {
        replacements.insert("userName".into(), sender);
    }

    let drafts = generate_message_drafts(template, birth_date, &replacements, now)?;
    if drafts.is_empty() {
        println!("No messages scheduled.");
    }
    for draft in drafts {
        println!(
            "{}  [{}]  {}",
            draft.scheduled_at.to_rfc3339(),
            draft.activity_id,
            draft.text
        );
    }
    Ok(())
}

fn session_config_from_env() -> anyhow::Result<SessionConfig> {
    let var = |key: &str| std::env::var(key).ok();
    Ok(SessionConfig::from_env_values(
        var(ENV_USER_ID_SYSTEM),
        var(ENV_CAREPLAN_TEMPLATE),
        var(ENV_WELCOME_MESSAGE),
        var(ENV_CAREPLAN_DURATION_DAYS),
        var(ENV_FILL_DEFAULT_CONSENTS),
    )?)
}

fn read_resources(path: &Path) -> anyhow::Result<Vec<Resource>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_resources(&text)
}

/// Accepts a bare JSON array of resources or a FHIR `Bundle` with `entry[].resource`.
fn parse_resources(text: &str) -> anyhow::Result<Vec<Resource>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut bundle)
            if bundle.get("resourceType").and_then(|t| t.as_str()) == Some("Bundle") =>
        {
            match bundle.remove("entry") {
                Some(serde_json::Value::Array(entries)) => entries
                    .into_iter()
                    .filter_map(|mut e| e.get_mut("resource").map(serde_json::Value::take))
                    .collect(),
                Some(_) => bail!("Bundle.entry must be an array"),
                None => Vec::new(),
            }
        }
        _ => bail!("expected a JSON array of resources or a Bundle"),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            serde_json::from_value::<Resource>(item)
                .with_context(|| format!("record {idx} is not a supported resource"))
        })
        .collect()
}

fn print_snapshot(snapshot: &isacc_core::SessionSnapshot) {
    println!("State: {:?}", snapshot.state);
    if let Some(error) = &snapshot.error {
        println!("Error: {}", error);
    }
    if let Some(patient) = &snapshot.patient {
        println!(
            "Patient: {} ({})",
            patient.id.as_deref().unwrap_or("-"),
            patient.full_name_display()
        );
    }
    if let Some(first_time) = snapshot.is_first_time_user {
        println!("First-time user: {}", first_time);
    }
    if let Some(care_plan) = &snapshot.care_plan {
        println!(
            "Care plan: {} ({} activities)",
            care_plan.id.as_deref().unwrap_or("-"),
            care_plan.activity.len()
        );
    }
    if let Some(error) = &snapshot.onboarding_error {
        println!("Onboarding message failed: {}", error);
    }
    println!(
        "Communications: {} ({} in progress)",
        snapshot.communications.len(),
        snapshot.active_communications().len()
    );
    println!(
        "Questionnaires: {}, responses: {}",
        snapshot.questionnaires.len(),
        snapshot.questionnaire_responses.len()
    );
    if let Some(consents) = &snapshot.consents {
        for org in consents.organizations() {
            if let Some(group) = consents.group(org) {
                for (class, permission) in group.iter() {
                    println!(
                        "Consent: {} {} -> {:?}",
                        org,
                        class.code.as_deref().unwrap_or("-"),
                        permission
                    );
                }
            }
        }
    }
}
