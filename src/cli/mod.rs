mod commands;
mod handlers;

pub use commands::{Cli, Commands};
pub use handlers::{
    handle_add, handle_clear, handle_delete, handle_list, handle_run, handle_serve, handle_times,
};
