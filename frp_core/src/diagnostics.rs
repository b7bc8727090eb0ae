// The point of these diagnostics is to give useful error messages when
// something samples or observes a reactive illegally. They track where a
// reactive was created and where the offending access happened.

#[cfg(debug_assertions)]
#[derive(Copy, Clone)]
pub(crate) struct AccessDiagnostics {
    pub defined_at: &'static std::panic::Location<'static>,
    pub called_at: &'static std::panic::Location<'static>,
}

#[cfg(not(debug_assertions))]
#[derive(Copy, Clone, Default)]
pub(crate) struct AccessDiagnostics {}

impl AccessDiagnostics {
    /// Suffix appended to panic messages at the access boundary; empty in
    /// release builds.
    pub fn context(&self) -> String {
        cfg_if::cfg_if! {
            if #[cfg(debug_assertions)] {
                format!(
                    " (reactive defined at {}, accessed at {})",
                    self.defined_at, self.called_at
                )
            } else {
                String::new()
            }
        }
    }
}

macro_rules! diagnostics {
    ($this:ident) => {{
        cfg_if::cfg_if! {
            if #[cfg(debug_assertions)] {
                $crate::diagnostics::AccessDiagnostics {
                    defined_at: $this.defined_at,
                    called_at: std::panic::Location::caller(),
                }
            } else {
                $crate::diagnostics::AccessDiagnostics {}
            }
        }
    }};
}

pub(crate) use diagnostics;
