use std::net::SocketAddr;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use yatube::auth::password::hash_password;
use yatube::config::{Cli, Command, Config};
use yatube::db;
use yatube::routes;
use yatube::state::{AppState, DbPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli)?;
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Ensure media directory exists
    std::fs::create_dir_all(config.media_path())?;

    // Initialize database
    let pool = db::create_pool(&config.db_path())?;
    db::run_migrations(&pool)?;

    match cli.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => serve(pool, config).await,
        Command::CreateUser {
            username,
            password,
            display_name,
            admin,
        } => create_user(&pool, &config, &username, &password, display_name.as_deref(), admin),
        Command::CreateGroup {
            title,
            slug,
            description,
        } => create_group(&pool, &title, &slug, &description),
    }
}

async fn serve(pool: DbPool, config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let app = routes::app(AppState::new(pool, config));

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn create_user(
    pool: &DbPool,
    config: &Config,
    username: &str,
    password: &str,
    display_name: Option<&str>,
    admin: bool,
) -> anyhow::Result<()> {
    let conn = pool.get()?;
    if db::users::username_taken(&conn, username)? {
        anyhow::bail!("User {} already exists", username);
    }

    let hash = hash_password(password, config.auth.password_cost)?;
    let id = db::users::create(&conn, username, display_name, Some(&hash), admin)?;
    tracing::info!("Created user {} (id {})", username, id);
    Ok(())
}

fn create_group(pool: &DbPool, title: &str, slug: &str, description: &str) -> anyhow::Result<()> {
    let conn = pool.get()?;
    if db::groups::find_by_slug(&conn, slug)?.is_some() {
        anyhow::bail!("Group with slug {} already exists", slug);
    }

    let id = db::groups::create(&conn, title, slug, description)?;
    tracing::info!("Created group {} at /group/{}/ (id {})", title, slug, id);
    Ok(())
}
