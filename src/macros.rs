//! Utility macros for declaring per-kind state sets

/// Declare a closed workflow state enum
///
/// Variants are ranked in declaration order, so they must be listed in the
/// table's topological order with the error sink last. Each variant carries
/// its persisted label and its [`StateMode`](crate::state_machine::StateMode).
///
/// # Examples
///
/// ```
/// use fsm_worker::state_machine::{StateMode, WorkflowState};
/// use fsm_worker::workflow_states;
///
/// workflow_states! {
///     pub enum DemoState {
///         initial = Created,
///         error = Error,
///         states {
///             Created => ("created", SelfAdvancing),
///             Completed => ("completed", Terminal),
///             Error => ("error", Terminal),
///         }
///     }
/// }
///
/// assert_eq!(DemoState::INITIAL.as_str(), "created");
/// assert_eq!("completed".parse::<DemoState>().unwrap(), DemoState::Completed);
/// assert_eq!(DemoState::Error.mode(), StateMode::Terminal);
/// ```
#[macro_export]
macro_rules! workflow_states {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            initial = $initial:ident,
            error = $error:ident,
            states {
                $( $(#[$vmeta:meta])* $variant:ident => ($label:literal, $mode:ident) ),+ $(,)?
            }
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            ::serde::Serialize, ::serde::Deserialize,
        )]
        $vis enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $label)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
        }

        impl $crate::state_machine::WorkflowState for $name {
            const INITIAL: Self = $name::$initial;
            const ERROR: Self = $name::$error;

            fn all() -> &'static [Self] {
                Self::ALL
            }

            fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }

            fn mode(&self) -> $crate::state_machine::StateMode {
                match self {
                    $($name::$variant => $crate::state_machine::StateMode::$mode,)+
                }
            }

            fn rank(&self) -> usize {
                *self as usize
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str($crate::state_machine::WorkflowState::as_str(self))
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s {
                    $($label => Ok($name::$variant),)+
                    _ => Err(format!("Invalid {} state: {}", stringify!($name), s)),
                }
            }
        }
    };
}
