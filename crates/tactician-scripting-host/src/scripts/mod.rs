//! Native scripts shipped with the engine, referenced as `native:<name>`.

mod donation_ledger;
mod embargo_traitors;

pub use donation_ledger::DonationLedger;
pub use embargo_traitors::EmbargoTraitors;

use crate::registry::ScriptRegistry;

pub fn register_builtins(registry: &mut ScriptRegistry) {
    registry.register_native(EmbargoTraitors::NAME, || Box::new(EmbargoTraitors));
    registry.register_native(DonationLedger::NAME, || Box::new(DonationLedger));
}
