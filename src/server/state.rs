use crate::access::AccessGate;

pub struct AppState {
    pub gate: AccessGate,
}
