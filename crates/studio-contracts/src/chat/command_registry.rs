#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    /// Key the argument is stored under in `Intent::command_args`.
    pub arg: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "intensity",
        action: "set_intensity",
        arg: "intensity",
    },
    CommandSpec {
        command: "style",
        action: "set_backdrop_style",
        arg: "style",
    },
    CommandSpec {
        command: "preset",
        action: "set_preset",
        arg: "preset",
    },
    CommandSpec {
        command: "count",
        action: "set_variation_count",
        arg: "count",
    },
    CommandSpec {
        command: "custom",
        action: "set_custom_instructions",
        arg: "text",
    },
    CommandSpec {
        command: "preview",
        action: "select_preview",
        arg: "index",
    },
    CommandSpec {
        command: "replace",
        action: "replace_object",
        arg: "text",
    },
    CommandSpec {
        command: "feedback",
        action: "submit_feedback",
        arg: "text",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "load",
        action: "load_image",
        arg: "path",
    },
    CommandSpec {
        command: "asset",
        action: "set_swap_asset",
        arg: "path",
    },
    CommandSpec {
        command: "mask",
        action: "set_mask",
        arg: "path",
    },
    CommandSpec {
        command: "export",
        action: "export",
        arg: "path",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "generate",
        action: "generate",
        arg: "",
    },
    CommandSpec {
        command: "accept",
        action: "accept",
        arg: "",
    },
    CommandSpec {
        command: "cancel",
        action: "cancel",
        arg: "",
    },
    CommandSpec {
        command: "dismiss",
        action: "dismiss_error",
        arg: "",
    },
    CommandSpec {
        command: "undo",
        action: "undo",
        arg: "",
    },
    CommandSpec {
        command: "redo",
        action: "redo",
        arg: "",
    },
    CommandSpec {
        command: "clear_asset",
        action: "clear_swap_asset",
        arg: "",
    },
    CommandSpec {
        command: "clear_mask",
        action: "clear_mask",
        arg: "",
    },
    CommandSpec {
        command: "status",
        action: "status",
        arg: "",
    },
    CommandSpec {
        command: "admin",
        action: "unlock_admin",
        arg: "",
    },
    CommandSpec {
        command: "help",
        action: "help",
        arg: "",
    },
];

pub const SESSION_HELP_COMMANDS: &[&str] = &[
    "/load",
    "/intensity",
    "/style",
    "/asset",
    "/clear_asset",
    "/preset",
    "/count",
    "/custom",
    "/generate",
    "/mask",
    "/clear_mask",
    "/replace",
    "/preview",
    "/accept",
    "/cancel",
    "/dismiss",
    "/undo",
    "/redo",
    "/status",
    "/export",
    "/admin",
    "/feedback",
    "/help",
];
