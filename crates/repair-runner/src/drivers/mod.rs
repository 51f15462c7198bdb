mod arja_e;
mod cardumen;

pub use arja_e::ArjaE;
pub use cardumen::Cardumen;

use crate::tool::RepairTool;

pub const TOOL_NAMES: &[&str] = &["arja_e", "cardumen"];

/// Driver for a tool name, case-insensitive.
pub fn tool_by_name(name: &str) -> Option<Box<dyn RepairTool>> {
    match name.to_ascii_lowercase().as_str() {
        "arja_e" | "arja-e" => Some(Box::new(ArjaE::new())),
        "cardumen" => Some(Box::new(Cardumen::new())),
        _ => None,
    }
}
