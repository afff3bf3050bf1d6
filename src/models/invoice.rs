use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::models::catalog::ServiceUnit;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invoice {
    pub id: String,
    pub booking_id: Option<String>,
    pub customer_id: String,
    pub line_items: Vec<LineItem>,
    pub subtotal: i64,
    pub discount_percent: u32,
    pub discount_amount: i64,
    pub total_amount: i64,
    pub deposit_amount: i64,
    pub status: InvoiceStatus,
    pub payment_method: PaymentMethod,
    pub refunds: Vec<RefundRecord>,
    pub history: Vec<StatusChange>,
    pub note: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub version: i64,
}

impl Invoice {
    pub fn refunded_amount(&self) -> i64 {
        self.refunds.iter().map(|r| r.amount).sum()
    }

    pub fn refundable_balance(&self) -> i64 {
        self.total_amount - self.refunded_amount()
    }

    /// Status implied by the refunds recorded against a settled invoice.
    pub fn settled_status(&self) -> InvoiceStatus {
        let refunded = self.refunded_amount();
        if refunded == 0 {
            InvoiceStatus::Paid
        } else if refunded < self.total_amount {
            InvoiceStatus::PartiallyRefunded
        } else {
            InvoiceStatus::Refunded
        }
    }

    pub fn record_transition(
        &mut self,
        to: InvoiceStatus,
        actor: &str,
        reason: Option<String>,
        at: NaiveDateTime,
    ) {
        self.history.push(StatusChange {
            from: self.status,
            to,
            actor: actor.to_string(),
            reason,
            at,
        });
        self.status = to;
        self.updated_at = at;
    }

    /// Checks every invariant an invoice must satisfy before it is written.
    pub fn validate(&self) -> AppResult<()> {
        let subtotal: i64 = self.line_items.iter().map(|l| l.amount).sum();
        if subtotal != self.subtotal {
            return Err(AppError::Validation(format!(
                "subtotal {} does not match line items {subtotal}",
                self.subtotal
            )));
        }
        if self.discount_percent > 100 {
            return Err(AppError::Validation(format!(
                "discount percent {} out of range",
                self.discount_percent
            )));
        }
        if self.total_amount != self.subtotal - self.discount_amount || self.total_amount < 0 {
            return Err(AppError::Validation(format!(
                "total {} does not equal subtotal {} minus discount {}",
                self.total_amount, self.subtotal, self.discount_amount
            )));
        }
        if self.refunds.iter().any(|r| r.amount <= 0) {
            return Err(AppError::Validation("refund amounts must be positive".into()));
        }
        if self.refunded_amount() > self.total_amount {
            return Err(AppError::Validation(format!(
                "refunds {} exceed invoice total {}",
                self.refunded_amount(),
                self.total_amount
            )));
        }

        let consistent = match self.status {
            InvoiceStatus::Unpaid | InvoiceStatus::Cancelled => self.refunds.is_empty(),
            InvoiceStatus::Paid | InvoiceStatus::PartiallyRefunded | InvoiceStatus::Refunded => {
                self.status == self.settled_status()
            }
        };
        if !consistent {
            return Err(AppError::Validation(format!(
                "status {} inconsistent with refunded amount {}",
                self.status,
                self.refunded_amount()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub kind: LineItemKind,
    pub description: String,
    pub service_id: Option<String>,
    pub unit: Option<ServiceUnit>,
    pub unit_price: i64,
    pub quantity: u32,
    pub duration_minutes: Option<i64>,
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LineItemKind {
    CourtFee,
    Service,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Unpaid,
    Paid,
    Cancelled,
    Refunded,
    PartiallyRefunded,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Unpaid => "unpaid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
            InvoiceStatus::Refunded => "refunded",
            InvoiceStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unpaid" => Some(InvoiceStatus::Unpaid),
            "paid" => Some(InvoiceStatus::Paid),
            "cancelled" => Some(InvoiceStatus::Cancelled),
            "refunded" => Some(InvoiceStatus::Refunded),
            "partially_refunded" => Some(InvoiceStatus::PartiallyRefunded),
            _ => None,
        }
    }

    pub fn is_refundable(&self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::PartiallyRefunded)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Counter,
    BankTransfer,
    Card,
    EWallet,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Counter => "counter",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Card => "card",
            PaymentMethod::EWallet => "e_wallet",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "counter" => Some(PaymentMethod::Counter),
            "bank_transfer" => Some(PaymentMethod::BankTransfer),
            "card" => Some(PaymentMethod::Card),
            "e_wallet" => Some(PaymentMethod::EWallet),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefundRecord {
    pub id: String,
    pub amount: i64,
    pub reason: String,
    pub reason_type: RefundReasonType,
    pub actor: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundReasonType {
    CustomerRequest,
    Weather,
    FacilityIssue,
    DuplicatePayment,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusChange {
    pub from: InvoiceStatus,
    pub to: InvoiceStatus,
    pub actor: String,
    pub reason: Option<String>,
    pub at: NaiveDateTime,
}

/// Administrative correction applied through `InvoiceManager::adjust`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoicePatch {
    pub status: Option<InvoiceStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub discount_percent: Option<u32>,
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 16)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn invoice(total: i64) -> Invoice {
        Invoice {
            id: "inv-1".to_string(),
            booking_id: None,
            customer_id: "cust-1".to_string(),
            line_items: vec![LineItem {
                kind: LineItemKind::Service,
                description: "Racket rental".to_string(),
                service_id: Some("svc-1".to_string()),
                unit: Some(ServiceUnit::Use),
                unit_price: total,
                quantity: 1,
                duration_minutes: None,
                amount: total,
            }],
            subtotal: total,
            discount_percent: 0,
            discount_amount: 0,
            total_amount: total,
            deposit_amount: 0,
            status: InvoiceStatus::Paid,
            payment_method: PaymentMethod::Card,
            refunds: vec![],
            history: vec![],
            note: None,
            created_at: at(),
            updated_at: at(),
            version: 0,
        }
    }

    fn refund(amount: i64) -> RefundRecord {
        RefundRecord {
            id: uuid::Uuid::new_v4().to_string(),
            amount,
            reason: "rain".to_string(),
            reason_type: RefundReasonType::Weather,
            actor: "cashier-1".to_string(),
            created_at: at(),
        }
    }

    #[test]
    fn test_settled_status_follows_refunds() {
        let mut inv = invoice(200_000);
        assert_eq!(inv.settled_status(), InvoiceStatus::Paid);
        inv.refunds.push(refund(50_000));
        assert_eq!(inv.settled_status(), InvoiceStatus::PartiallyRefunded);
        inv.refunds.push(refund(150_000));
        assert_eq!(inv.settled_status(), InvoiceStatus::Refunded);
        assert_eq!(inv.refundable_balance(), 0);
    }

    #[test]
    fn test_validate_rejects_over_refund() {
        let mut inv = invoice(100);
        inv.refunds.push(refund(101));
        inv.status = InvoiceStatus::Refunded;
        assert!(matches!(inv.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_stale_status() {
        let mut inv = invoice(100);
        inv.refunds.push(refund(40));
        assert!(inv.validate().is_err());
        inv.status = InvoiceStatus::PartiallyRefunded;
        assert!(inv.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_total() {
        let mut inv = invoice(100);
        inv.total_amount = 90;
        assert!(inv.validate().is_err());
    }

    #[test]
    fn test_record_transition_appends_history() {
        let mut inv = invoice(100);
        inv.status = InvoiceStatus::Unpaid;
        inv.record_transition(InvoiceStatus::Paid, "cashier-1", None, at());
        assert_eq!(inv.status, InvoiceStatus::Paid);
        assert_eq!(inv.history.len(), 1);
        assert_eq!(inv.history[0].from, InvoiceStatus::Unpaid);
    }
}
