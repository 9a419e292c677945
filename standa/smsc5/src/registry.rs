//! Command and reply layouts of the 8SMC5-USB, see the controller's programming manual.

use labdaemon::frame::{FieldKind, FieldSpec};

/// Reply length of commands that only echo their command code.
pub const ECHO_REPLY_LEN: usize = 4;

/// A named parameter of a command, with its width in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    /// Width of the field in the frame.
    pub width: usize,
    /// Name of the parameter, used for labelled parameters `name:value`.
    pub name: &'static str,
}

const fn param(width: usize, name: &'static str) -> Param {
    Param { width, name }
}

/// A high-level client command and how it is translated into a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDef {
    /// Name the client uses.
    pub name: &'static str,
    /// Four character command code of the controller.
    pub code: &'static str,
    /// Parameters of the command, in frame order.
    pub params: &'static [Param],
    /// Number of reserved bytes after the parameters.
    pub reserved: usize,
    /// Length of the reply in bytes.
    pub reply_len: usize,
}

impl CommandDef {
    /// Does this command send a frame with parameters, or only its command code?
    pub fn has_params(&self) -> bool {
        !self.params.is_empty()
    }

    /// Usage of the command, e.g., `move pos upos`.
    pub fn usage(&self) -> String {
        std::iter::once(self.name)
            .chain(self.params.iter().map(|p| p.name))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// All high-level commands known to the daemon.
pub const COMMANDS: [CommandDef; 7] = [
    CommandDef {
        name: "get_device_info",
        code: "gsti",
        params: &[],
        reserved: 0,
        reply_len: 70,
    },
    CommandDef {
        name: "get_move_pars",
        code: "gmov",
        params: &[],
        reserved: 0,
        reply_len: 30,
    },
    CommandDef {
        name: "get_position",
        code: "gpos",
        params: &[],
        reserved: 0,
        reply_len: 26,
    },
    CommandDef {
        name: "set_move_pars",
        code: "smov",
        params: &[
            param(4, "speed"),
            param(1, "uspeed"),
            param(2, "accel"),
            param(2, "decel"),
            param(4, "anti_play_speed"),
            param(1, "uanti_play_speed"),
        ],
        reserved: 10,
        reply_len: ECHO_REPLY_LEN,
    },
    CommandDef {
        name: "move",
        code: "move",
        params: &[param(4, "pos"), param(2, "upos")],
        reserved: 6,
        reply_len: ECHO_REPLY_LEN,
    },
    CommandDef {
        name: "move_in_direction",
        code: "movr",
        params: &[param(4, "dpos"), param(2, "udpos")],
        reserved: 6,
        reply_len: ECHO_REPLY_LEN,
    },
    CommandDef {
        name: "set_zero",
        code: "zero",
        params: &[],
        reserved: 0,
        reply_len: ECHO_REPLY_LEN,
    },
];

/// Look up a high-level command by its name.
pub fn lookup(name: &str) -> Option<&'static CommandDef> {
    COMMANDS.iter().find(|def| def.name == name)
}

/// Reply to `gsti`: manufacturer and product name.
pub const GSTI_REPLY: [FieldSpec; 2] = [
    FieldSpec::new(16, "manufacturer", FieldKind::Text),
    FieldSpec::new(24, "product", FieldKind::Text),
];

/// Reply to `gmov`: the movement parameters.
pub const GMOV_REPLY: [FieldSpec; 6] = [
    FieldSpec::new(4, "speed", FieldKind::Unsigned),
    FieldSpec::new(1, "uspeed", FieldKind::Unsigned),
    FieldSpec::new(2, "accel", FieldKind::Unsigned),
    FieldSpec::new(2, "decel", FieldKind::Unsigned),
    FieldSpec::new(4, "anti_play_speed", FieldKind::Unsigned),
    FieldSpec::new(1, "uanti_play_speed", FieldKind::Unsigned),
];

/// Reply to `gpos`: step position, microstep position, and encoder position.
pub const GPOS_REPLY: [FieldSpec; 3] = [
    FieldSpec::new(4, "position", FieldKind::Signed),
    FieldSpec::new(2, "uposition", FieldKind::Signed),
    FieldSpec::new(8, "encposition", FieldKind::Signed),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(lookup("move").unwrap().code, "move");
        assert_eq!(lookup("move_in_direction").unwrap().code, "movr");
        assert!(lookup("mov").is_none());
    }

    #[test]
    fn test_usage() {
        assert_eq!(lookup("move").unwrap().usage(), "move pos upos");
        assert_eq!(lookup("set_zero").unwrap().usage(), "set_zero");
    }

    #[test]
    fn test_frame_lengths() {
        // code + params + reserved + crc must match the reply lengths of the matching getters
        let smov = lookup("set_move_pars").unwrap();
        let len: usize = smov.params.iter().map(|p| p.width).sum::<usize>() + smov.reserved + 6;
        assert_eq!(len, lookup("get_move_pars").unwrap().reply_len);
    }
}
