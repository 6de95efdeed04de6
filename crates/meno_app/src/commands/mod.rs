mod cookbook;
mod generate;

pub use cookbook::{run_cookbook, run_sync, CookbookCmd};
pub use generate::{run_generate, GenerateArgs};
