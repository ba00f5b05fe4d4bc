// Desktop-Demo: Loopback-Engine, gesteuert über stdin
//
// Befehle: color <r> <g> <b> | asset | pick <pfad-oder-uri> | start | end
//          join <uid> | leave <uid> | token <token> | view | quit

use anyhow::Context;
use backdrop_lib::background::{Color, FixedPick};
use backdrop_lib::call_engine::{LoopbackHandle, LoopbackOptions, OfflineReason};
use backdrop_lib::config::AppConfig;
use backdrop_lib::presentation::frontend_event;
use backdrop_lib::{App, Collaborators};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    backdrop_lib::init_tracing();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    let (collaborators, handle) = Collaborators::loopback(&config, LoopbackOptions::default());
    let app = App::new(config, collaborators);

    // Events als JSON-Zeilen ausgeben
    let mut events = app.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let (name, payload) = frontend_event(&event);
            println!("{} {}", name, payload);
        }
    });

    if let Err(e) = app.start().await {
        tracing::error!("Initialization failed: {}", e);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            continue;
        };
        let args: Vec<&str> = parts.collect();

        if command == "quit" {
            break;
        }
        if let Err(e) = run_command(&app, &handle, command, &args).await {
            eprintln!("error: {:#}", e);
        }
    }

    app.shutdown().await;
    Ok(())
}

async fn run_command(
    app: &App,
    handle: &LoopbackHandle,
    command: &str,
    args: &[&str],
) -> anyhow::Result<()> {
    match command {
        "color" => {
            let [r, g, b] = args else {
                anyhow::bail!("usage: color <r> <g> <b>");
            };
            let color = Color::new(r.parse()?, g.parse()?, b.parse()?)?;
            app.select_color(color);
        }
        "asset" => {
            let selection = app.select_bundled_asset().await?;
            println!("{:?}", selection);
        }
        "pick" => {
            let picker = match args.first() {
                Some(uri) => FixedPick::uri(*uri),
                None => FixedPick::cancelled(),
            };
            let selection = app.select_image(&picker).await?;
            println!("{:?}", selection);
        }
        "start" => {
            let call_id = app.start_call().await?;
            println!("call {}", call_id);
        }
        "end" => app.end_call().await?,
        "token" => {
            let token = args.first().context("usage: token <token>")?;
            app.renew_token(token.to_string()).await?;
        }
        "join" | "leave" => {
            let uid: u32 = args
                .first()
                .context("usage: join|leave <uid>")?
                .parse()?;
            let delivered = if command == "join" {
                handle.remote_join(uid)
            } else {
                handle.remote_leave(uid, OfflineReason::Quit)
            };
            if !delivered {
                anyhow::bail!("engine is not running");
            }
        }
        "view" => println!("{}", serde_json::to_string_pretty(&app.view())?),
        other => anyhow::bail!("unknown command '{}'", other),
    }
    Ok(())
}
