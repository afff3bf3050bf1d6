use serde::{Deserialize, Serialize};

/// The authenticated caller, as handed over by the session layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Staff,
    Cashier,
    Manager,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "customer" => Some(Role::Customer),
            "staff" => Some(Role::Staff),
            "cashier" => Some(Role::Cashier),
            "manager" => Some(Role::Manager),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ViewAvailability,
    ViewBooking,
    HoldBooking,
    ConfirmBooking,
    EditBooking,
    CancelBooking,
    ViewInvoice,
    CreateInvoice,
    MarkInvoicePaid,
    CancelInvoice,
    RefundInvoice,
    AdjustInvoice,
    SweepHolds,
}

impl Action {
    fn minimum_role(&self) -> Role {
        match self {
            Action::ViewAvailability
            | Action::ViewBooking
            | Action::HoldBooking
            | Action::ConfirmBooking => Role::Customer,
            Action::EditBooking | Action::ViewInvoice | Action::CreateInvoice => Role::Staff,
            Action::CancelBooking
            | Action::MarkInvoicePaid
            | Action::CancelInvoice
            | Action::RefundInvoice
            | Action::AdjustInvoice => Role::Cashier,
            Action::SweepHolds => Role::Manager,
        }
    }
}

pub fn can_perform(action: Action, principal: &Principal) -> bool {
    principal.role >= action.minimum_role()
}
