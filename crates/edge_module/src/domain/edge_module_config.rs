use serde::{Deserialize, Serialize};

/// Staleness filter channel carrying fruit detections
pub const FRUIT_CHANNEL: &str = "fruit";

/// Staleness filter channel carrying accelerometer orientation
pub const ORIENTATION_CHANNEL: &str = "orientation";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeModuleConfig {
    /// Name announced in the module-loaded message
    pub module_id: String,

    pub fruit_input_route: String,
    pub orientation_input_route: String,

    pub set_fruit_method: String,
    pub set_orientation_method: String,

    /// Output routes that receive the module-loaded message on start
    pub module_loaded_routes: Vec<String>,
}

impl Default for EdgeModuleConfig {
    fn default() -> Self {
        Self {
            module_id: "twinbridge".to_string(),
            fruit_input_route: "fruit".to_string(),
            orientation_input_route: "orientation".to_string(),
            set_fruit_method: "SetFruit".to_string(),
            set_orientation_method: "SetOrientation".to_string(),
            module_loaded_routes: vec![
                "moduleLoadedLocal0".to_string(),
                "moduleLoadedLocal1".to_string(),
                "moduleLoadedUpstream".to_string(),
            ],
        }
    }
}
