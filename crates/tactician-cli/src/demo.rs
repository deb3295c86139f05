//! Engine wired to a [`SimulatedGame`] whose world moves on its own.

use std::time::Duration;

use anyhow::Context;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, info};

use tactician_client::SystemClock;
use tactician_client::config::TacticianConfig;
use tactician_client::game::{MessageType, RawUnit, Tile, UnitKind};
use tactician_client::sim::SimulatedGame;
use tactician_events::RunMode;
use tactician_runner::{ActionDraft, Engine, EngineHandle, LoggingConsumer, SettingDefinition, SettingType};

const TREASURY_SCRIPT: &str = r#"fn run {
  let me_now = me
  if me_now == null {
    return null
  }
  if me_now.gold >= settings.threshold {
    info "Treasury at " + str(me_now.gold) + " gold" @player(me_now)
  }
  state.samples = (state.samples or 0) + 1
}
"#;

const STRUCTURE_WATCH_SCRIPT: &str = r#"on "structureBuilt" per_team when not event.isSelf {
  warn event.ownerName + " built a " + event.structureType @team(event.team)
}
cleanup {
  info "Structure watch closed"
}
"#;

const GREETING_SCRIPT: &str = r#"let allies = 0
for p in players {
  if p.team == me.team and not p.isSelf {
    allies = allies + 1
  }
}
info "Hello from " + me.name + ", " + str(allies) + " teammate(s) online"
"#;

/// Change the simulated world once per game tick
fn evolve(sim: &SimulatedGame) {
    let tick = sim.advance();
    sim.with_world(|w| {
        for player in &mut w.players {
            player.gold += 150;
            player.troops += 40;
        }
    });
    match tick % 40 {
        10 => sim.push_message(MessageType::SentTroopsToPlayer, "Sent 2.5K troops to [NAV] Bosun", 1),
        20 => sim.push_message(MessageType::ReceivedGoldFromPlayer, "Received 10K gold from Corsair", 1),
        30 => sim.with_world(|w| {
            let id = 1_000 + tick;
            let owner = if tick % 80 == 30 { "p2" } else { "p4" };
            w.units
                .push(RawUnit::new(id, owner, UnitKind::City, Tile::new((tick % 97) as u32, 12)));
        }),
        _ => {}
    }
    if tick == 120 {
        debug!(target: "demo", "Drifter turns traitor");
        sim.with_world(|w| {
            if let Some(p) = w.players.iter_mut().find(|p| p.id == "p4") {
                p.is_traitor = true;
            }
        });
    }
}

async fn create(handle: &EngineHandle, draft: ActionDraft) -> anyhow::Result<tactician_events::ActionId> {
    let id = handle.create_action().await?;
    handle
        .call(move |engine| engine.save_action(id, draft))
        .await??;
    Ok(id)
}

async fn seed_actions(handle: &EngineHandle) -> anyhow::Result<()> {
    while !handle.call(|engine| engine.is_attached()).await? {
        sleep(Duration::from_millis(50)).await;
    }

    let treasury = create(
        handle,
        ActionDraft::new("Treasury report", TREASURY_SCRIPT, RunMode::Continuous)
            .interval(50)
            .setting(SettingDefinition::new("threshold", SettingType::Number, 60_000.0)),
    )
    .await?;
    handle.start_action(treasury).await?;

    // Event definitions start on save
    create(
        handle,
        ActionDraft::new("Structure watch", STRUCTURE_WATCH_SCRIPT, RunMode::Event),
    )
    .await?;
    create(
        handle,
        ActionDraft::new("Donation ledger", "native:donation_ledger", RunMode::Event),
    )
    .await?;

    let embargo = create(
        handle,
        ActionDraft::new("Embargo traitors", "native:embargo_traitors", RunMode::Continuous)
            .interval(20)
            .setting(SettingDefinition::new("resume_when_clean", SettingType::Toggle, true)),
    )
    .await?;
    handle.start_action(embargo).await?;

    let greeting = create(
        handle,
        ActionDraft::new("Greeting", GREETING_SCRIPT, RunMode::Once),
    )
    .await?;
    handle.start_action(greeting).await?;
    Ok(())
}

pub async fn run(config: TacticianConfig, verbose: bool, limit: Option<Duration>) -> anyhow::Result<()> {
    let sim = SimulatedGame::demo();
    let tick_ms = config.engine.tick_ms;

    let mut engine = Engine::new(Box::new(sim.clone()), Box::new(SystemClock), &config);
    engine.add_consumer(if verbose {
        LoggingConsumer::verbose()
    } else {
        LoggingConsumer::new()
    });
    let (handle, engine_task) = tactician_runner::spawn(engine);

    let world = tokio::spawn({
        let sim = sim.clone();
        async move {
            let mut ticker = interval(Duration::from_millis(tick_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                evolve(&sim);
            }
        }
    });

    seed_actions(&handle).await?;

    match limit {
        Some(limit) => {
            tokio::select! {
                _ = sleep(limit) => info!("Demo time is up"),
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
        None => {
            let _ = tokio::signal::ctrl_c().await;
            info!("Interrupted");
        }
    }

    handle.shutdown();
    world.abort();
    let engine = engine_task.await.context("engine task failed")?;
    info!(
        "Demo stopped at game tick {} with {} log entries and {} embargo command(s)",
        sim.tick(),
        engine.logs().count(),
        sim.embargo_log().len()
    );
    Ok(())
}
