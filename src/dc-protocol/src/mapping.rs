// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Conversion from wire DTOs into scheduler types.

use dc_core::{
    Command, CommandSet, CommanderRef, ControlInfo, ManagerResult, Rank, TakeAction,
};

/// Build a command set owned by `commander` from an `add_command_set` request.
pub fn command_set_from_client(
    rank: Rank,
    command_id: Option<String>,
    commands: Vec<Command>,
    control: ControlInfo,
    commander: CommanderRef,
) -> CommandSet {
    let mut set = CommandSet::new(rank, commands)
        .with_control_info(control)
        .with_commander(commander);
    set.command_id = command_id;
    set
}

/// Parse a take-action verdict, accepting the legacy `isOk` alias for `DONE`.
pub fn parse_take_action(action: &str) -> ManagerResult<TakeAction> {
    action.trim().parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc_core::{ChannelCommander, ManagerError, OperationStatus};

    #[test]
    fn test_command_set_carries_owner_and_flags() {
        let (commander, _rx) = ChannelCommander::new("client-1");
        let set = command_set_from_client(
            3,
            Some("poll".into()),
            vec![Command::new(vec![0xAA])],
            ControlInfo {
                has_error_handling: true,
                ..ControlInfo::default()
            },
            commander.into(),
        );
        assert_eq!(set.rank, 3);
        assert_eq!(set.command_id.as_deref(), Some("poll"));
        assert_eq!(set.commander_id(), Some("client-1"));
        assert!(set.control_info.has_error_handling);
        assert_eq!(set.operation_status, OperationStatus::Wait);
        assert_eq!(set.curr_cmd_index, 0);
    }

    #[test]
    fn test_parse_take_action() {
        assert_eq!(parse_take_action(" next "), Ok(TakeAction::Next));
        assert_eq!(parse_take_action("isOk"), Ok(TakeAction::Done));
        assert_eq!(
            parse_take_action("maybe"),
            Err(ManagerError::UnknownAction("maybe".into()))
        );
    }
}
