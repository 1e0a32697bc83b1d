// Metrics placeholders for the payment flows.
// If a metrics infrastructure exists later, swap these no-ops with real counters.

#[macro_export]
macro_rules! pay_counter_inc {
    ($name:expr $(, $key:expr => $val:expr )* $(,)?) => {
        // no-op placeholder
        let _ = ($name $(, $key, $val )*);
    };
}
