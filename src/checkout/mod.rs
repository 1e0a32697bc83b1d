// Checkout core: intent building at session creation, reconciliation at
// verification. The Stripe session's metadata map is the only durable record
// between the two halves, so the key set below is the contract.

pub mod intent;
pub mod reconcile;

/// Metadata keys serialized into the checkout session at creation time and
/// read back verbatim at verification time. The reconciler depends on key
/// presence, so absent optional values are written as placeholders
/// (COUPON_NONE, "0", "") rather than omitted.
pub mod keys {
    pub const PAYMENT_TYPE: &str = "paymentType";
    pub const PACKAGE_ID: &str = "packageId";
    pub const USER_ID: &str = "userId";
    pub const PACKAGE_NAME: &str = "packageName";
    pub const ORIGINAL_AMOUNT: &str = "originalAmount";
    pub const DISCOUNT_AMOUNT: &str = "discountAmount";
    pub const COUPON_CODE: &str = "couponCode";
    pub const CURRENCY: &str = "currency";
    pub const RECIPIENT_TYPE: &str = "recipientType";
    pub const RECIPIENT_ID: &str = "recipientId";
    pub const RECIPIENT_NAME: &str = "recipientName";
    pub const SENDER_ID: &str = "senderId";
    pub const SENDER_NAME: &str = "senderName";
    pub const MESSAGE: &str = "message";
}

/// Sentinel meaning "no coupon" in session metadata. Reconciled back to None.
pub const COUPON_NONE: &str = "none";
