/// Example: clamp!(Tempo, u32, TEMPO_MIN, TEMPO_MAX, DEFAULT_USEC24, pub);
/// Where:
/// - Tempo is the name of the struct that will be created.
/// - u32 is the underlying data type
/// - TEMPO_MIN is the minimum allowed value
/// - TEMPO_MAX is the maximum allowed value
/// - DEFAULT_USEC24 is the default value
/// - pub is the visibility of the struct
macro_rules! clamp {
    ($symbol:ident, $inner_type:ty, $min:expr, $max:expr, $default:expr, $visibility:vis) => {
        /// $inner_type value clamped to be between $min and $max.
        #[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
        $visibility struct $symbol($inner_type);

        impl Default for $symbol {
            fn default() -> Self {
                Self::new($default)
            }
        }

        impl $symbol {
            /// Silently clamps the value if it is out of range.
            #[allow(dead_code)]
            $visibility const fn new(value: $inner_type) -> Self {
                let (clamped, _) = Self::clamp(value);
                Self(clamped)
            }

            /// Returns the inner value.
            #[allow(dead_code)]
            $visibility fn get(&self) -> $inner_type {
                self.0
            }

            /// Clamps and sets. Returns `true` if `value` was in range. Returns `false` if `value`
            /// was out-of-range.
            #[allow(dead_code)]
            $visibility fn set(&mut self, value: $inner_type) -> bool {
                let (clamped, result) = Self::clamp(value);
                self.0 = clamped;
                result
            }

            #[allow(unused_comparisons)]
            const fn clamp(value: $inner_type) -> ($inner_type, bool) {
                if value < $min {
                    ($min, false)
                } else if value > $max {
                    ($max, false)
                } else {
                    (value, true)
                }
            }
        }

        impl From<$inner_type> for $symbol {
            fn from(value: $inner_type) -> Self {
                Self::new(value)
            }
        }

        impl std::fmt::Display for $symbol {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

#[test]
fn clamp_test() {
    clamp!(Period, u32, 10, 1000, 500, pub);
    let p: Period = 3u32.into();
    assert_eq!(10, p.get());
    let mut q = Period::default();
    assert!(!q.set(2000));
    assert_eq!(1000, q.get());
    let fmted = format!("{}", Period::new(42));
    assert_eq!("42", fmted.as_str());
}
