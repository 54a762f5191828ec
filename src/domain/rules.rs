//! Stateless payment rules. Every time-dependent check takes `now` explicitly.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::payment::{Payment, PaymentStatus, PaymentType};
use crate::error::{AppError, AppResult, DomainError, ValidationError};

pub const ALLOWED_CURRENCIES: [&str; 4] = ["KZT", "USD", "EUR", "RUB"];
pub const DEFAULT_REFUND_WINDOW_DAYS: i64 = 30;
pub const DEFAULT_PAYMENT_TTL_MINUTES: i64 = 30;

pub fn is_allowed_currency(currency: &str) -> bool {
    ALLOWED_CURRENCIES.contains(&currency)
}

pub fn validate(payment: &Payment) -> AppResult<()> {
    if payment.member_id.trim().is_empty() {
        return Err(AppError::validation(ValidationError::MissingField {
            field: "member_id".to_string(),
        }));
    }
    if payment.invoice_id.trim().is_empty() {
        return Err(AppError::validation(ValidationError::MissingField {
            field: "invoice_id".to_string(),
        }));
    }
    validate_amount(payment.amount)?;
    validate_currency(&payment.currency)
}

pub fn validate_amount(amount: i64) -> AppResult<()> {
    if amount <= 0 {
        return Err(AppError::validation(ValidationError::InvalidAmount {
            amount,
            reason: "amount must be greater than zero".to_string(),
        }));
    }
    Ok(())
}

pub fn validate_currency(currency: &str) -> AppResult<()> {
    if !is_allowed_currency(currency) {
        return Err(AppError::validation(ValidationError::InvalidCurrency {
            currency: currency.to_string(),
            reason: format!("supported currencies: {}", ALLOWED_CURRENCIES.join(", ")),
        }));
    }
    Ok(())
}

pub fn validate_status_transition(current: PaymentStatus, next: PaymentStatus) -> AppResult<()> {
    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(AppError::domain(DomainError::InvalidTransition {
            from: current.to_string(),
            to: next.to_string(),
        }))
    }
}

/// Shortest chain of allowed edges from `current` to `target`, at most one
/// intermediate hop through Processing. The returned path excludes `current`.
pub fn transition_path(current: PaymentStatus, target: PaymentStatus) -> AppResult<Vec<PaymentStatus>> {
    if current.can_transition_to(target) {
        return Ok(vec![target]);
    }
    let via = PaymentStatus::Processing;
    if current != via && current.can_transition_to(via) && via.can_transition_to(target) {
        validate_status_transition(current, via)?;
        validate_status_transition(via, target)?;
        return Ok(vec![via, target]);
    }
    validate_status_transition(current, target).map(|_| vec![target])
}

/// Expiry only applies before completion.
pub fn is_expired(payment: &Payment, now: DateTime<Utc>) -> bool {
    payment.status.is_open() && now > payment.expires_at
}

pub fn can_refund(payment: &Payment, window: Duration, now: DateTime<Utc>) -> AppResult<()> {
    if payment.status != PaymentStatus::Completed {
        return Err(AppError::domain(DomainError::RefundNotAllowed {
            reason: format!("payment is {}, only completed payments can be refunded", payment.status),
        }));
    }
    let completed_at = payment.completed_at.ok_or_else(|| {
        AppError::domain(DomainError::RefundNotAllowed {
            reason: "payment has no completion time".to_string(),
        })
    })?;
    if now - completed_at > window {
        return Err(AppError::domain(DomainError::RefundWindowExpired {
            completed_at: completed_at.to_rfc3339(),
            window_days: window.num_days(),
        }));
    }
    Ok(())
}

/// `{type}-{unix seconds}-{12 hex}`. The random tail keeps ids unique when
/// many are generated within the same second.
pub fn generate_invoice_id(payment_type: PaymentType, now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", payment_type.as_str(), now.timestamp(), &random[..12])
}

/// `10000 KZT` renders as `100.00 KZT`. Unknown currencies print the raw
/// minor-unit integer.
pub fn format_amount(amount: i64, currency: &str) -> String {
    if !is_allowed_currency(currency) {
        return format!("{} {}", amount, currency);
    }
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}{}.{:02} {}", sign, abs / 100, abs % 100, currency)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::{PaymentMethod, PaymentUpdate};
    use std::collections::HashSet;

    fn payment_with_status(status: PaymentStatus, now: DateTime<Utc>) -> Payment {
        let mut payment = Payment::new_pending(
            "fine-1-abcdef012345".to_string(),
            "m1".to_string(),
            5000,
            "KZT".to_string(),
            PaymentMethod::Card,
            PaymentType::Fine,
            None,
            now,
            now + Duration::minutes(30),
        );
        payment.status = status;
        if status.requires_completed_at() {
            payment.completed_at = Some(now);
        }
        payment
    }

    #[test]
    fn transition_table_is_exact() {
        use PaymentStatus::*;
        let allowed: HashSet<(PaymentStatus, PaymentStatus)> = [
            (Pending, Processing),
            (Pending, Cancelled),
            (Pending, Failed),
            (Processing, Completed),
            (Processing, Failed),
            (Processing, Cancelled),
            (Completed, Refunded),
            (Failed, Pending),
        ]
        .into_iter()
        .collect();

        for from in PaymentStatus::ALL {
            for to in PaymentStatus::ALL {
                let result = validate_status_transition(from, to);
                if allowed.contains(&(from, to)) {
                    assert!(result.is_ok(), "{} -> {} should be allowed", from, to);
                } else {
                    let err = result.expect_err("transition should be rejected");
                    assert!(err.is_invalid_transition(), "{} -> {}", from, to);
                }
            }
        }
    }

    #[test]
    fn cancelled_and_refunded_have_no_exits() {
        assert!(PaymentStatus::Cancelled.allowed_transitions().is_empty());
        assert!(PaymentStatus::Refunded.allowed_transitions().is_empty());
    }

    #[test]
    fn success_from_pending_walks_through_processing() {
        let path = transition_path(PaymentStatus::Pending, PaymentStatus::Completed).unwrap();
        assert_eq!(path, vec![PaymentStatus::Processing, PaymentStatus::Completed]);

        let path = transition_path(PaymentStatus::Processing, PaymentStatus::Completed).unwrap();
        assert_eq!(path, vec![PaymentStatus::Completed]);

        assert!(transition_path(PaymentStatus::Pending, PaymentStatus::Refunded).is_err());
        assert!(transition_path(PaymentStatus::Cancelled, PaymentStatus::Completed).is_err());
    }

    #[test]
    fn expiry_is_a_pre_completion_concept() {
        let now = Utc::now();
        let long_ago = now - Duration::days(365);

        for status in PaymentStatus::ALL {
            let mut payment = payment_with_status(status, now);
            payment.expires_at = long_ago;
            assert_eq!(is_expired(&payment, now), status.is_open(), "{}", status);

            payment.expires_at = now + Duration::minutes(1);
            assert!(!is_expired(&payment, now));
        }
    }

    #[test]
    fn refund_window_is_enforced() {
        let now = Utc::now();
        let window = Duration::days(DEFAULT_REFUND_WINDOW_DAYS);
        let mut payment = payment_with_status(PaymentStatus::Completed, now);

        payment.completed_at = Some(now - Duration::hours(1));
        assert!(can_refund(&payment, window, now).is_ok());

        payment.completed_at = Some(now - Duration::days(31));
        let err = can_refund(&payment, window, now).unwrap_err();
        assert_eq!(err.status_code(), 422);
        assert!(err.user_message().contains("30 days"));

        payment.completed_at = None;
        assert!(can_refund(&payment, window, now).is_err());
    }

    #[test]
    fn only_completed_payments_are_refundable() {
        let now = Utc::now();
        let window = Duration::days(30);
        for status in PaymentStatus::ALL {
            let payment = payment_with_status(status, now);
            assert_eq!(
                can_refund(&payment, window, now).is_ok(),
                status == PaymentStatus::Completed,
                "{}",
                status
            );
        }
    }

    #[test]
    fn validate_rejects_bad_input() {
        let now = Utc::now();
        let good = payment_with_status(PaymentStatus::Pending, now);
        assert!(validate(&good).is_ok());

        let mut p = good.clone();
        p.amount = 0;
        assert!(validate(&p).is_err());

        let mut p = good.clone();
        p.currency = "GBP".to_string();
        assert!(validate(&p).is_err());

        let mut p = good.clone();
        p.member_id = " ".to_string();
        assert!(validate(&p).is_err());

        let mut p = good;
        p.invoice_id.clear();
        assert!(validate(&p).is_err());
    }

    #[test]
    fn invoice_ids_are_unique_within_one_second() {
        let now = Utc::now();
        let ids: HashSet<String> = (0..1000)
            .map(|_| generate_invoice_id(PaymentType::Fine, now))
            .collect();
        assert_eq!(ids.len(), 1000);

        let id = generate_invoice_id(PaymentType::Deposit, now);
        assert!(id.starts_with(&format!("deposit-{}-", now.timestamp())));
        assert_eq!(id.rsplit('-').next().map(str::len), Some(12));
    }

    #[test]
    fn format_amount_known_and_unknown_currencies() {
        assert_eq!(format_amount(10000, "KZT"), "100.00 KZT");
        assert_eq!(format_amount(50, "KZT"), "0.50 KZT");
        assert_eq!(format_amount(123456, "USD"), "1234.56 USD");
        assert_eq!(format_amount(-250, "EUR"), "-2.50 EUR");
        assert_eq!(format_amount(10000, "TTT"), "10000 TTT");
    }

    #[test]
    fn update_after_path_keeps_invariant() {
        let now = Utc::now();
        let mut payment = payment_with_status(PaymentStatus::Pending, now);
        for step in transition_path(payment.status, PaymentStatus::Completed).unwrap() {
            validate_status_transition(payment.status, step).unwrap();
            payment.apply(&PaymentUpdate::new(step, now));
        }
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert!(payment.completed_at.is_some());
    }
}
