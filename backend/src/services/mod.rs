pub mod auth;
pub mod capacity;
pub mod forecast_selector;
pub mod site_registry;
pub mod telemetry;

/// Reduce a kW value to 3 decimals without ever exceeding it. Values that
/// already have 3 decimals come back unchanged.
pub fn floor_kw(value: f64) -> f64 {
    let rounded = round_kw(value);
    if rounded <= value {
        rounded
    } else {
        ((value * 1000.0).floor() / 1000.0).min(value)
    }
}

/// Round a kW value to 3 decimals.
pub fn round_kw(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
