use anyhow::Result;
use clap::{Parser, Subcommand};
use common::{Args, ExecutionContext, RegisteredElement, Role};
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::{env, sync::Arc};
use tracing::info;

use crate::catalog::Catalog;
use crate::http_engine::RegistryEngine;

/// - En Docker: REGISTRY_URL=http://registry:8080
/// - Local: default http://localhost:8080
fn registry_base_url() -> String {
    env::var("REGISTRY_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

fn default_role() -> String {
    env::var("TASK_ROLE").unwrap_or_else(|_| "submitter".to_string())
}

#[derive(Parser)]
#[command(name = "submitter")]
#[command(about = "Declara tareas, las ejecuta y entrega sus descriptores al registry")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ejecuta el catálogo de demo (dos rondas por tarea)
    Run {
        /// unset | submitter | worker (default: TASK_ROLE o submitter)
        #[arg(long, value_name = "ROL")]
        role: Option<String>,

        #[arg(long, default_value_t = 4)]
        value: i64,
    },
    /// Lista los descriptores registrados
    List,
    /// Muestra un descriptor registrado
    Show {
        #[arg(value_name = "SIGNATURE")]
        signature: String,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let base_url = registry_base_url();

    match cli.command {
        Commands::Run { role, value } => {
            let role: Role = role.unwrap_or_else(default_role).parse()?;
            // el engine HTTP es bloqueante: fuera del runtime async
            tokio::task::spawn_blocking(move || run_catalog(role, value, &base_url)).await??;
        }

        Commands::List => {
            let url = format!("{}/api/v1/core-elements", base_url);
            let resp = Client::new().get(&url).send().await?;
            if resp.status().is_success() {
                let elements: Vec<RegisteredElement> = resp.json().await?;
                if elements.is_empty() {
                    println!("No hay descriptores registrados.");
                }
                for e in elements {
                    println!(
                        "{:<32} {:<11} id={} ({})",
                        e.descriptor.canonical_signature(),
                        e.implementation_type().map(|t| t.as_str()).unwrap_or("-"),
                        e.registration_id,
                        e.registered_at
                    );
                }
            } else {
                println!("Error consultando {} (status {})", url, resp.status());
            }
        }

        Commands::Show { signature } => {
            let url = format!("{}/api/v1/core-elements/{}", base_url, signature);
            let resp = Client::new().get(&url).send().await?;
            match resp.status() {
                StatusCode::NOT_FOUND => println!("No se encontró {signature} en el registry"),
                status if status.is_success() => {
                    let e: RegisteredElement = resp.json().await?;
                    println!("{}", e.descriptor);
                    println!("  - id            : {}", e.registration_id);
                    println!("  - registrado    : {}", e.registered_at);
                }
                status => println!("Error consultando {} (status {})", url, status),
            }
        }
    }

    Ok(())
}

fn run_catalog(role: Role, value: i64, base_url: &str) -> Result<()> {
    let ctx = ExecutionContext::global().clone();
    let engine = match role {
        Role::Submitter => {
            let engine = Arc::new(RegistryEngine::new(base_url)?);
            ctx.start_submitter(engine.clone())?;
            Some(engine)
        }
        Role::Worker => {
            ctx.start_worker()?;
            None
        }
        Role::Unset => None,
    };

    let catalog = Catalog::declare(&ctx)?;
    info!("catálogo declarado, rol {}", role);

    for round in 1..=2 {
        let inc = catalog.increment.call(Args::new().arg(json!(value)))?;
        let solved = catalog
            .solve
            .call(Args::from_positional([json!([value, value + 1, value + 2])]))?;
        let scaled = catalog.scale.call(Args::new().kwarg("x", json!(value)))?;

        println!("Ronda {round}:");
        println!("  increment({value}) = {inc}");
        println!("  solve([{value}..]) = {solved}");
        println!("  scale({value})     = {scaled}");
    }

    println!();
    for task in catalog.all() {
        match task.descriptor() {
            Some(d) => println!("{d}"),
            None => println!("{}: sin descriptor (rol {})", task.signature(), role),
        }
        if let Some(engine) = &engine {
            println!("  - envíos        : {}", engine.submissions(&task.signature()));
        }
    }

    ctx.stop();
    Ok(())
}
