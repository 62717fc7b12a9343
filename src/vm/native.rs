//! Built-in native functions.

use std::time::{SystemTime, UNIX_EPOCH};

use super::heap::Heap;
use super::object::NativeFn;
use super::value::Value;

/// Natives installed as globals in every new VM: (name, arity, function).
pub const NATIVES: &[(&str, usize, NativeFn)] = &[("clock", 0, clock)];

/// Seconds since the Unix epoch.
pub fn clock(_heap: &mut Heap, _args: &[Value]) -> Result<Value, String> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| format!("clock unavailable: {}", e))?;
    Ok(Value::Number(elapsed.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_positive() {
        let mut heap = Heap::new();
        let now = clock(&mut heap, &[]).unwrap();
        assert!(now.as_number().unwrap() > 0.0);
    }
}
