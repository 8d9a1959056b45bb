use crate::error::{AppError, AppResult};

/// Per-night rates for a room type, in whole currency units.
#[derive(Debug, Clone, Copy)]
pub struct RoomRates {
    pub price_per_night: i64,
    pub extra_adult_price: i64,
    pub extra_child_price: i64,
    /// Adults included in the nightly price, per unit.
    pub base_occupancy: i64,
    /// Hard cap on guests (adults + children), per unit.
    pub max_guests: i64,
}

/// Room and extra-guest charges before discount and tax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrossBreakdown {
    pub base_amount: i64,
    pub extra_charges: i64,
    pub gross_amount: i64,
    pub extra_adults: i64,
    pub extra_children: i64,
}

/// The full money split for one booking. Computed once at creation and
/// stored on the booking row; never recomputed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingResult {
    pub base_amount: i64,
    pub extra_charges: i64,
    pub gross_amount: i64,
    pub discount: i64,
    pub taxes: i64,
    pub total_amount: i64,
    pub admin_commission: i64,
    pub partner_payout: i64,
}

/// Room cost for the stay. Extra adults are those beyond the rate's base
/// occupancy across all units; every child is charged the child rate.
pub fn gross_breakdown(
    rates: &RoomRates,
    nights: i64,
    units: i64,
    adults: i64,
    children: i64,
) -> AppResult<GrossBreakdown> {
    if nights <= 0 {
        return Err(AppError::BadRequest(
            "Stay must be at least one night.".to_string(),
        ));
    }
    if units <= 0 {
        return Err(AppError::BadRequest(
            "At least one unit must be booked.".to_string(),
        ));
    }
    if adults <= 0 {
        return Err(AppError::BadRequest(
            "At least one adult guest is required.".to_string(),
        ));
    }
    if children < 0 {
        return Err(AppError::BadRequest("Invalid guest count.".to_string()));
    }
    if adults + children > rates.max_guests * units {
        return Err(AppError::UnprocessableEntity(format!(
            "Guest count exceeds the room capacity of {} per unit.",
            rates.max_guests
        )));
    }

    let extra_adults = (adults - rates.base_occupancy * units).max(0);
    let extra_children = children;

    let base_amount = rates.price_per_night * nights * units;
    let extra_charges = rates.extra_adult_price * extra_adults * nights
        + rates.extra_child_price * extra_children * nights;

    Ok(GrossBreakdown {
        base_amount,
        extra_charges,
        gross_amount: base_amount + extra_charges,
        extra_adults,
        extra_children,
    })
}

/// Turn a gross breakdown plus a resolved discount into the final split.
///
/// Tax and commission are both computed on the gross amount, not the
/// discounted amount, so promotions never eat into tax remittance or the
/// platform's cut. Commission is floored at `min_commission` per booking.
pub fn settle_amounts(
    gross: &GrossBreakdown,
    discount: i64,
    commission_percent: f64,
    tax_percent: f64,
    min_commission: i64,
) -> AppResult<PricingResult> {
    let discount = discount.clamp(0, gross.gross_amount);

    let taxes = percent_of(gross.gross_amount, tax_percent);
    let admin_commission = percent_of(gross.gross_amount, commission_percent).max(min_commission);
    let total_amount = gross.gross_amount - discount + taxes;
    let partner_payout = total_amount - taxes - admin_commission;

    if partner_payout < 0 {
        return Err(AppError::UnprocessableEntity(
            "Discount exceeds the partner's share for this stay.".to_string(),
        ));
    }

    Ok(PricingResult {
        base_amount: gross.base_amount,
        extra_charges: gross.extra_charges,
        gross_amount: gross.gross_amount,
        discount,
        taxes,
        total_amount,
        admin_commission,
        partner_payout,
    })
}

fn percent_of(amount: i64, percent: f64) -> i64 {
    ((amount as f64) * percent / 100.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::{gross_breakdown, settle_amounts, RoomRates};

    fn standard_rates() -> RoomRates {
        RoomRates {
            price_per_night: 1000,
            extra_adult_price: 300,
            extra_child_price: 150,
            base_occupancy: 2,
            max_guests: 4,
        }
    }

    #[test]
    fn two_night_single_unit_split() {
        // ₹1000/night, 2 nights, 1 unit, commission 10%, tax 12%, floor ₹50.
        let gross = gross_breakdown(&standard_rates(), 2, 1, 2, 0).unwrap();
        assert_eq!(gross.base_amount, 2000);
        assert_eq!(gross.extra_charges, 0);

        let result = settle_amounts(&gross, 0, 10.0, 12.0, 50).unwrap();
        assert_eq!(result.taxes, 240);
        assert_eq!(result.admin_commission, 200);
        assert_eq!(result.total_amount, 2240);
        assert_eq!(result.partner_payout, 1800);
    }

    #[test]
    fn flat_coupon_leaves_tax_and_commission_on_gross() {
        let gross = gross_breakdown(&standard_rates(), 2, 1, 2, 0).unwrap();
        let result = settle_amounts(&gross, 100, 10.0, 12.0, 50).unwrap();
        assert_eq!(result.discount, 100);
        assert_eq!(result.taxes, 240);
        assert_eq!(result.admin_commission, 200);
        assert_eq!(result.total_amount, 2140);
        assert_eq!(result.partner_payout, 1700);
    }

    #[test]
    fn commission_floor_applies_to_cheap_stays() {
        let rates = RoomRates {
            price_per_night: 200,
            ..standard_rates()
        };
        let gross = gross_breakdown(&rates, 1, 1, 2, 0).unwrap();
        let result = settle_amounts(&gross, 0, 10.0, 12.0, 50).unwrap();
        // 10% of 200 is 20, floored up to 50.
        assert_eq!(result.admin_commission, 50);
    }

    #[test]
    fn extra_guests_are_charged_per_night() {
        let gross = gross_breakdown(&standard_rates(), 3, 1, 3, 1).unwrap();
        assert_eq!(gross.extra_adults, 1);
        assert_eq!(gross.extra_children, 1);
        assert_eq!(gross.extra_charges, 300 * 3 + 150 * 3);
    }

    #[test]
    fn base_occupancy_scales_with_units() {
        let gross = gross_breakdown(&standard_rates(), 1, 2, 4, 0).unwrap();
        assert_eq!(gross.extra_adults, 0);
        assert_eq!(gross.base_amount, 2000);
    }

    #[test]
    fn invariants_hold_across_inputs() {
        for (nights, units, adults, children, discount) in [
            (1, 1, 1, 0, 0),
            (2, 1, 2, 0, 100),
            (5, 2, 5, 2, 900),
            (7, 3, 6, 0, 0),
        ] {
            let gross = gross_breakdown(&standard_rates(), nights, units, adults, children).unwrap();
            let result = settle_amounts(&gross, discount, 10.0, 12.0, 50).unwrap();
            assert_eq!(
                result.total_amount,
                result.gross_amount - result.discount + result.taxes
            );
            assert_eq!(
                result.partner_payout,
                result.total_amount - result.taxes - result.admin_commission
            );
            assert!(result.admin_commission >= 50);
        }
    }

    #[test]
    fn zero_night_stays_are_rejected() {
        assert!(gross_breakdown(&standard_rates(), 0, 1, 2, 0).is_err());
        assert!(gross_breakdown(&standard_rates(), -1, 1, 2, 0).is_err());
    }

    #[test]
    fn overfull_rooms_are_rejected() {
        assert!(gross_breakdown(&standard_rates(), 1, 1, 4, 1).is_err());
    }

    #[test]
    fn discount_cannot_exceed_gross() {
        let gross = gross_breakdown(&standard_rates(), 2, 1, 2, 0).unwrap();
        let result = settle_amounts(&gross, 10_000, 0.0, 0.0, 0).unwrap();
        assert_eq!(result.discount, 2000);
        assert_eq!(result.total_amount, 0);
    }
}
