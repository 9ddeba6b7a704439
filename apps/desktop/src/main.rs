use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings_from, DEFAULT_SETTINGS_FILE},
    AppContainer, DeviceCapability, EditShadow, InteractorMode, Operation, Outcome, SessionRoute,
};
use futures::future::join_all;
use shared::{
    domain::{Identity, ItemDraft, ItemId},
    protocol::{AuthorizationArtifact, AuthorizationGrant},
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Command-line surface for the item list")]
struct Cli {
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,
    #[arg(long)]
    backend_url: Option<String>,
    /// Use in-process interactors instead of talking to a backend.
    #[arg(long)]
    preview: bool,
    #[arg(long)]
    device: Option<DeviceCapability>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    List,
    Add {
        body: String,
    },
    Toggle {
        id: String,
    },
    Remove {
        id: String,
    },
    Rename {
        id: String,
        body: String,
    },
    /// Exchange an authorization artifact obtained from the identity provider.
    Login {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        artifact: String,
    },
    /// Sign in through the configured path (delegated or test credential).
    SignIn,
    Logout,
    /// Walk through every operation against whichever interactors are wired.
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings_from(&cli.settings, |key| std::env::var(key).ok())
        .with_context(|| format!("failed to load settings from {}", cli.settings.display()))?;
    if let Some(url) = cli.backend_url {
        settings.backend_url = url;
    }
    if cli.preview {
        settings.interactors = InteractorMode::Preview;
    }
    if let Some(device) = cli.device {
        settings.device = device;
    }

    let container = AppContainer::live(settings)?;
    let _route_log = container.store().subscribe(|state| {
        debug!(route = ?SessionRoute::from(state.session()), items = state.items().len(), "state changed");
    });

    let result = run(&container, cli.command).await;
    container.shutdown();
    result
}

async fn run(container: &AppContainer, command: Command) -> Result<()> {
    settle(container.session().check_session())
        .await
        .or_else(tolerate_signed_out)?;

    match command {
        Command::List => {
            require_signed_in(container)?;
            settle(container.items().fetch_all()).await?;
            print_items(container);
        }
        Command::Add { body } => {
            require_signed_in(container)?;
            settle(container.items().create(ItemDraft::new(body))).await?;
            print_items(container);
        }
        Command::Toggle { id } => {
            let item = fetch_item(container, &id).await?;
            settle(container.items().update(item.toggled())).await?;
            print_items(container);
        }
        Command::Remove { id } => {
            require_signed_in(container)?;
            settle(container.items().fetch_all()).await?;
            settle(container.items().delete(ItemId::new(id))).await?;
            print_items(container);
        }
        Command::Rename { id, body } => {
            let item = fetch_item(container, &id).await?;
            let mut shadow = EditShadow::begin(&item);
            shadow.set_body(body);
            match shadow.commit(container.items()) {
                Some(operation) => {
                    settle(operation).await?;
                }
                None => info!(item_id = %item.id, "nothing to rename"),
            }
            print_items(container);
        }
        Command::Login {
            name,
            email,
            artifact,
        } => {
            sign_out_if_needed(container).await?;
            let grant = AuthorizationGrant {
                identity: Identity { name, email },
                artifact: AuthorizationArtifact(artifact),
            };
            settle(container.session().login(grant)).await?;
            print_session(container);
        }
        Command::SignIn => {
            sign_out_if_needed(container).await?;
            settle(container.session().sign_in()).await?;
            print_session(container);
        }
        Command::Logout => {
            settle(container.session().logout()).await?;
            print_session(container);
        }
        Command::Demo => demo(container).await?,
    }
    Ok(())
}

async fn settle(operation: Operation) -> Result<Outcome> {
    let name = operation.name();
    let outcome = operation
        .await
        .with_context(|| format!("{name} failed"))?;
    if let Outcome::Ignored(reason) = &outcome {
        warn!(operation = name, ?reason, "completion was not applied");
    }
    Ok(outcome)
}

/// A failed session check still leaves the store signed out with an error;
/// the commands below decide whether that matters.
fn tolerate_signed_out(err: anyhow::Error) -> Result<Outcome> {
    warn!(error = %err, "session check failed");
    Ok(Outcome::Applied)
}

fn require_signed_in(container: &AppContainer) -> Result<()> {
    let snapshot = container.store().snapshot();
    match SessionRoute::from(snapshot.session()) {
        SessionRoute::Items => Ok(()),
        route => match route.banner() {
            Some(banner) => bail!("{banner}"),
            None => bail!("not signed in; run `login` or `sign-in` first"),
        },
    }
}

async fn sign_out_if_needed(container: &AppContainer) -> Result<()> {
    if container.store().snapshot().session().is_signed_in() {
        settle(container.session().logout()).await?;
    }
    Ok(())
}

async fn fetch_item(container: &AppContainer, id: &str) -> Result<shared::domain::Item> {
    require_signed_in(container)?;
    settle(container.items().fetch_all()).await?;
    container
        .store()
        .snapshot()
        .item(&ItemId::from(id))
        .cloned()
        .ok_or_else(|| anyhow!("no item with id {id}"))
}

fn print_items(container: &AppContainer) {
    for line in container.renderer().render(&container.store().snapshot()) {
        println!("{line}");
    }
}

fn print_session(container: &AppContainer) {
    let snapshot = container.store().snapshot();
    match (SessionRoute::from(snapshot.session()), snapshot.identity()) {
        (SessionRoute::Items, Some(identity)) => {
            println!("signed in as {} <{}>", identity.name, identity.email)
        }
        (SessionRoute::Items, None) => println!("signed in"),
        (route, _) => match route.banner() {
            Some(banner) => println!("{banner}"),
            None => println!("{}", snapshot.session().label()),
        },
    }
}

async fn demo(container: &AppContainer) -> Result<()> {
    if !container.store().snapshot().session().is_signed_in() {
        settle(container.session().sign_in()).await?;
    }
    print_session(container);

    // Overlapping fetches: only the last one issued may land.
    let outcomes = join_all((0..3).map(|_| container.items().fetch_all())).await;
    for outcome in outcomes {
        debug!(?outcome, "demo fetch settled");
    }
    print_items(container);

    settle(container.items().create(ItemDraft::new("milk"))).await?;
    let milk = container
        .store()
        .snapshot()
        .items()
        .iter()
        .rev()
        .find(|item| item.body == "milk")
        .cloned()
        .ok_or_else(|| anyhow!("created item did not reach the store"))?;
    print_items(container);

    settle(container.items().update(milk.toggled())).await?;
    print_items(container);

    settle(container.items().delete(milk.id.clone())).await?;
    // Late update for an item that no longer exists: ignored, never re-added.
    if let Ok(outcome) = container.items().update(milk).await {
        info!(?outcome, "update after delete");
    }
    print_items(container);

    settle(container.session().logout()).await?;
    print_session(container);
    container.settle().await;
    Ok(())
}
