use crate::models::PrecisionSpec;

const DECIMAL_SCALE: f64 = 1e8;

/// Round to 8 fractional digits to drop float drift
pub fn round8(value: f64) -> f64 {
    (value * DECIMAL_SCALE).round() / DECIMAL_SCALE
}

/// Round `amount` to the nearest multiple of `step_size`
pub fn round_to_step(amount: f64, step_size: f64) -> f64 {
    if step_size <= 0.0 || !step_size.is_finite() {
        return round8(amount);
    }
    round8((amount / step_size).round() * step_size)
}

/// Smallest step multiple that is >= `min_quantity`
pub fn min_step_aligned(precision: &PrecisionSpec) -> f64 {
    let steps = round8(precision.min_quantity / precision.step_size).ceil();
    round8(steps * precision.step_size)
}

/// Convert notional exposure into an exchange-legal order quantity
///
/// `raw = notional * leverage / price`, clamped up to the step-aligned minimum,
/// then snapped to the step grid.
///
/// # Example
/// ```
/// use autotrader::execution::sizing::size_order;
/// use autotrader::models::PrecisionSpec;
///
/// let precision = PrecisionSpec { min_quantity: 0.01, step_size: 0.001 };
/// let qty = size_order(500.0, 5, 3000.0, &precision).unwrap();
/// assert!((qty - 0.833).abs() < 1e-9);
/// ```
pub fn size_order(
    notional_per_order: f64,
    leverage: u32,
    price: f64,
    precision: &PrecisionSpec,
) -> Option<f64> {
    if !precision.is_valid() || !(price.is_finite() && price > 0.0) {
        return None;
    }

    let raw = notional_per_order * leverage as f64 / price;
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }

    let clamped = raw.max(min_step_aligned(precision));
    let quantity = round_to_step(clamped, precision.step_size);

    (quantity > 0.0).then_some(quantity)
}

/// Number of decimal places implied by a step size (0.001 -> 3)
pub fn step_decimals(step_size: f64) -> usize {
    let mut decimals = 0;
    let mut scaled = step_size;
    while decimals < 8 && (scaled - scaled.round()).abs() > 1e-9 {
        scaled *= 10.0;
        decimals += 1;
    }
    decimals
}

/// Format a quantity with exactly the step's precision for the order API
pub fn format_quantity(quantity: f64, step_size: f64) -> String {
    format!("{:.*}", step_decimals(step_size), quantity)
}
