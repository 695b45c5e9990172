//! Navscope CLI
//!
//! Renders and validates menu definitions against a user context.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use navscope_kernel::config::Config;
use navscope_kernel::models::{Permission, Role, UserContext};
use navscope_kernel::navigation::menu::DEFAULT_MAX_DEPTH;
use navscope_kernel::navigation::{FilterOptions, MenuDefinition};
use navscope_kernel::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "navscope", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the navigation a user would see, as JSON.
    Render(RenderArgs),

    /// Parse a menu definition and report what it contains.
    Validate {
        /// Menu definition file (YAML, or JSON by extension).
        #[arg(long)]
        menu: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Menu definition file (YAML, or JSON by extension).
    #[arg(long)]
    menu: PathBuf,

    /// User id.
    #[arg(long)]
    user: String,

    /// Role name (super_admin, tenant_admin, manager, viewer).
    #[arg(long)]
    role: Option<Role>,

    /// Active tenant.
    #[arg(long)]
    tenant: Option<String>,

    /// Granted permission; repeat for more.
    #[arg(long = "permission")]
    permissions: Vec<Permission>,

    /// Treat the user as a platform operator.
    #[arg(long)]
    system_admin: bool,

    /// Include items marked invisible.
    #[arg(long)]
    include_hidden: bool,

    /// Include disabled items.
    #[arg(long)]
    include_disabled: bool,

    /// Maximum tree depth.
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Render(args) => render(args).await,
        Command::Validate { menu } => validate(&menu),
    }
}

async fn render(args: RenderArgs) -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    let state = AppState::new(&config)
        .await
        .context("failed to initialize application state")?;

    let menu = MenuDefinition::load(&args.menu)?
        .into_menu()
        .context("failed to build menu")?;
    let menu_id = menu.id().to_string();
    state.navigation().create_menu(menu)?;

    let mut ctx = UserContext::new(&args.user)
        .with_permissions(args.permissions)
        .with_system_admin(args.system_admin);
    if let Some(role) = args.role {
        ctx = ctx.with_role(role);
    }
    if let Some(tenant) = args.tenant {
        ctx = ctx.with_tenant(tenant);
    }

    let options = FilterOptions {
        include_disabled: args.include_disabled,
        include_hidden: args.include_hidden,
        max_depth: args.max_depth,
    };

    let items = state
        .navigation()
        .get_navigation_for_user(&menu_id, &ctx, &options)
        .await
        .with_context(|| format!("menu {menu_id} disappeared while rendering"))?;

    info!(menu = %menu_id, user = %ctx.user_id, roots = items.len(), "navigation rendered");
    println!(
        "{}",
        serde_json::to_string_pretty(&items).context("failed to serialize navigation")?
    );

    state.shutdown().await;
    Ok(())
}

fn validate(path: &std::path::Path) -> Result<()> {
    let definition = MenuDefinition::load(path)?;
    let declared = definition.item_count();
    let menu = definition.into_menu().context("failed to build menu")?;

    println!(
        "menu {} ({}): {} items, {} roots",
        menu.id(),
        menu.config().name,
        declared,
        menu.roots().len()
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("navscope=info,navscope_kernel=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
