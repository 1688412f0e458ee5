//! Seed script for development — mirrors sample content and scans it.
//!
//! Usage: `cargo run --bin seed`
//!
//! Requires `DATABASE_URL` and `JWT_SECRET` environment variables (reads .env).
//! Prints bearer tokens for a sample administrator and author.

use std::sync::Arc;

use accesslens::config::AppConfig;
use accesslens::coordinator::ScanTrigger;
use accesslens::db;
use accesslens::engine::{builtin, RuleCatalog};
use accesslens::models::content::UpsertContent;
use accesslens::models::user::UserRole;
use accesslens::services::auth;
use accesslens::AppState;

const ADMIN_ID: i64 = 1;
const AUTHOR_ID: i64 = 2;

/// (id, content type, author, title, body)
const SAMPLES: &[(i64, &str, i64, &str, &str)] = &[
    (
        42,
        "post",
        AUTHOR_ID,
        "Spring menu",
        r#"<h2>Spring menu</h2><p>Our new dishes are here.</p><img src="salad.jpg"><a href="/menu"></a>"#,
    ),
    (
        43,
        "page",
        ADMIN_ID,
        "Contact",
        r#"<h1></h1><p>Call us or <a href="https://maps.test" target="_blank">find us</a>.</p><button></button>"#,
    ),
    (
        44,
        "post",
        AUTHOR_ID,
        "Opening hours",
        r#"<p style="color:#777777;background-color:#ffffff">Open daily from nine.</p><img src="door.jpg" alt="Front door">"#,
    ),
    (
        45,
        "page",
        ADMIN_ID,
        "About",
        r#"<h1>About us</h1><p>We have cooked in this street since 1987.</p>"#,
    ),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    let stores = db::open_stores(&config).await?;
    let state = AppState::new(
        config.clone(),
        stores.findings,
        stores.content,
        Arc::new(RuleCatalog::with_rules(builtin::rules())),
    )?;

    println!("=== AccessLens Seed Script ===");

    for (id, content_type, author_id, title, body) in SAMPLES {
        let input = UpsertContent {
            site_id: None,
            content_type: content_type.to_string(),
            author_id: *author_id,
            title: title.to_string(),
            body: body.to_string(),
            scan_on_save: false,
        };
        state
            .content
            .upsert_content(*id, config.site_id, &input)
            .await?;

        let result = state
            .coordinator
            .scan_content(*id, ScanTrigger::Manual, Some(ADMIN_ID))
            .await?;
        println!(
            "[done] Content {id} \"{title}\": {} violation(s), {} new finding(s)",
            result.report.violations.len(),
            result.outcome.inserted.len()
        );
    }

    for (id, ..) in SAMPLES {
        let stats = state.aggregator.summarize(*id).await?;
        let pass = stats
            .pass_percentage
            .map_or_else(|| "n/a".to_string(), |p| format!("{p}%"));
        println!(
            "[stats] Content {id}: {} error(s), {} warning(s), {} contrast, pass {pass}, density {}",
            stats.errors, stats.warnings, stats.contrast_errors, stats.issue_density
        );
    }

    let admin = auth::issue_token("admin", ADMIN_ID, UserRole::Administrator, &config.jwt_secret, 86_400)?;
    let author = auth::issue_token("author", AUTHOR_ID, UserRole::Author, &config.jwt_secret, 86_400)?;

    println!("\n=== Seed complete! ===");
    println!("Administrator token: {admin}");
    println!("Author token: {author}");

    Ok(())
}
