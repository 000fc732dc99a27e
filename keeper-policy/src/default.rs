//! Built-in decision policy.
//!
//! | server changed | runtime                 | decision                 |
//! |----------------|-------------------------|--------------------------|
//! | yes            | changed, any protocol   | both                     |
//! | yes            | unchanged               | server*                  |
//! | no             | protocol match, unknown | runtime                  |
//! | no             | protocol mismatch       | runtime*                 |
//! | no             | protocol error          | nothing, error flag set  |
//!
//! `*` becomes "nothing" when `only_server_protocol_update` is set.

use keeper_core::UpdateDecision;
use keeper_oracle::ProtocolOutcome;

use crate::facts::ChangeFacts;

pub fn decide(facts: &ChangeFacts, only_server_protocol_update: bool) -> UpdateDecision {
    let decision = match (facts.server_changed, facts.runtime_protocol()) {
        (true, Some(_)) => UpdateDecision::both(),
        (true, None) if only_server_protocol_update => UpdateDecision::NOTHING,
        (true, None) => UpdateDecision::server(),
        (false, Some(ProtocolOutcome::Match | ProtocolOutcome::Unknown)) => {
            UpdateDecision::runtime()
        }
        (false, Some(ProtocolOutcome::Mismatch)) if only_server_protocol_update => {
            UpdateDecision::NOTHING
        }
        (false, Some(ProtocolOutcome::Mismatch)) => UpdateDecision::runtime(),
        (false, Some(ProtocolOutcome::Error)) => UpdateDecision::NOTHING,
        (false, None) => UpdateDecision::NOTHING,
    };
    if facts.protocol_error() {
        decision.with_error()
    } else {
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::server_only(ChangeFacts::server(), false, UpdateDecision::server())]
    #[case::server_only_gated(ChangeFacts::server(), true, UpdateDecision::NOTHING)]
    #[case::both(ChangeFacts::runtime(ProtocolOutcome::Mismatch).with_server(), true, UpdateDecision::both())]
    #[case::runtime_match(ChangeFacts::runtime(ProtocolOutcome::Match), true, UpdateDecision::runtime())]
    #[case::runtime_unknown(ChangeFacts::runtime(ProtocolOutcome::Unknown), false, UpdateDecision::runtime())]
    #[case::runtime_mismatch(ChangeFacts::runtime(ProtocolOutcome::Mismatch), false, UpdateDecision::runtime())]
    #[case::runtime_mismatch_gated(ChangeFacts::runtime(ProtocolOutcome::Mismatch), true, UpdateDecision::NOTHING)]
    #[case::runtime_error(ChangeFacts::runtime(ProtocolOutcome::Error), false, UpdateDecision::NOTHING.with_error())]
    #[case::nothing(ChangeFacts::none(), false, UpdateDecision::NOTHING)]
    fn default_table(
        #[case] facts: ChangeFacts,
        #[case] gate: bool,
        #[case] expected: UpdateDecision,
    ) {
        assert_eq!(decide(&facts, gate), expected);
    }

    #[test]
    fn server_change_with_protocol_error_still_updates_both() {
        let facts = ChangeFacts::runtime(ProtocolOutcome::Error).with_server();
        let decision = decide(&facts, false);
        assert!(decision.update_server && decision.update_runtime);
        assert!(decision.error);
    }
}
