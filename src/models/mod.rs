pub mod availability;
pub mod booking;
pub mod catalog;
pub mod invoice;
pub mod principal;
pub mod time;

pub use availability::{OperatingHours, SlotAvailability, SlotStatus, TimeSlot};
pub use booking::{BookingStatus, CourtReservation};
pub use catalog::{Court, CourtType, Customer, Service, ServiceUnit};
pub use invoice::{
    Invoice, InvoicePatch, InvoiceStatus, LineItem, LineItemKind, PaymentMethod, RefundReasonType,
    RefundRecord, StatusChange,
};
pub use principal::{can_perform, Action, Principal, Role};
