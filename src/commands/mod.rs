mod config_cmd;
mod document;

use clap::ValueEnum;

pub use config_cmd::ConfigCommand;
pub use document::DocumentCommand;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
