use tactician_events::{LogLevel, Mention, Value};

use crate::{Script, ScriptContext, ScriptError, ScriptOutcome};

const EMBARGOED_KEY: &str = "embargoed";

/// Stops trade with every traitor and with anyone who betrayed the local
/// player. With the `resume_when_clean` setting on, trade is resumed with
/// players this script embargoed once they are no longer flagged.
#[derive(Default)]
pub struct EmbargoTraitors;

impl EmbargoTraitors {
    pub const NAME: &'static str = "embargo_traitors";
}

impl Script for EmbargoTraitors {
    fn run(&mut self, ctx: &mut ScriptContext) -> Result<ScriptOutcome, ScriptError> {
        let Some(me) = ctx.game.me().cloned() else {
            ctx.log.debug("No local player yet");
            return Ok(ScriptOutcome::value(0u64));
        };

        let mut targets = Vec::new();
        let mut clean = Vec::new();
        for player in ctx.game.players().filter(|p| !p.is_self) {
            let flagged = player.is_traitor || player.betrayed.contains(&me.id);
            if flagged && !player.trade_stopped_by_self {
                targets.push((player.id.clone(), player.name.clone()));
            } else if !flagged {
                clean.push(player.id.clone());
            }
        }

        let mut embargoed: Vec<String> = ctx
            .state_get(EMBARGOED_KEY)
            .and_then(Value::as_list)
            .map(|ids| ids.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        for (id, name) in &targets {
            ctx.game.set_trade(id, true)?;
            ctx.log.log(
                LogLevel::Info,
                "Stopping trade with traitor",
                vec![Mention::Player {
                    id: id.clone(),
                    name: Some(name.clone()),
                }],
            );
            if !embargoed.contains(id) {
                embargoed.push(id.clone());
            }
        }

        let resume = ctx
            .setting("resume_when_clean")
            .is_some_and(Value::is_truthy);
        if resume {
            let (to_resume, keep): (Vec<String>, Vec<String>) =
                embargoed.into_iter().partition(|id| clean.contains(id));
            for id in &to_resume {
                ctx.game.set_trade(id, false)?;
                ctx.log.info(format!("Resuming trade with {}", id));
            }
            embargoed = keep;
        }

        ctx.state_set(EMBARGOED_KEY, embargoed);
        Ok(ScriptOutcome::value(targets.len() as u64))
    }
}
