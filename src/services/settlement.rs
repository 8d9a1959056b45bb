use serde_json::Value;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    auth::OwnerKind,
    error::{AppError, AppResult},
    services::wallet::{credit_tx, debit_tx, ensure_wallet_tx, TxnCategory},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    Wallet,
    PayAtHotel,
    Online,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wallet => "wallet",
            Self::PayAtHotel => "pay_at_hotel",
            Self::Online => "online",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "wallet" => Some(Self::Wallet),
            "pay_at_hotel" => Some(Self::PayAtHotel),
            "online" | "razorpay" => Some(Self::Online),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    Partial,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::Partial => "partial",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "failed" => Some(Self::Failed),
            "refunded" => Some(Self::Refunded),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }
}

/// The three parties of every booking settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    User,
    Partner,
    Treasury,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Credit,
    Debit,
}

/// One wallet movement in a settlement plan.
#[derive(Debug, Clone)]
pub struct Move {
    pub party: Party,
    pub direction: Direction,
    pub amount: i64,
    pub category: TxnCategory,
    pub description: String,
}

impl Move {
    fn credit(party: Party, amount: i64, category: TxnCategory, description: String) -> Self {
        Self {
            party,
            direction: Direction::Credit,
            amount,
            category,
            description,
        }
    }

    fn debit(party: Party, amount: i64, category: TxnCategory, description: String) -> Self {
        Self {
            party,
            direction: Direction::Debit,
            amount,
            category,
            description,
        }
    }

    /// Signed effect on the party's balance.
    pub fn signed_amount(&self) -> i64 {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }
}

/// The money fields of a booking, lifted out of the stored row.
#[derive(Debug, Clone)]
pub struct BookingMoney {
    pub booking_id: Uuid,
    pub booking_ref: String,
    pub user_id: Uuid,
    pub partner_id: Uuid,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub total_amount: i64,
    pub taxes: i64,
    pub admin_commission: i64,
    pub partner_payout: i64,
    pub wallet_deduction: i64,
}

impl BookingMoney {
    /// Commission plus tax: the platform's cut of this booking.
    pub fn platform_cut(&self) -> i64 {
        self.admin_commission + self.taxes
    }

    pub fn from_row(row: &Value, partner_id: Uuid) -> AppResult<Self> {
        let obj = row
            .as_object()
            .ok_or_else(|| AppError::Internal("Booking row is not an object.".to_string()))?;
        let get_str = |key: &str| {
            obj.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default()
        };
        let get_amount = |key: &str| {
            obj.get(key)
                .and_then(|v| {
                    v.as_i64()
                        .or_else(|| v.as_f64().map(|f| f.round() as i64))
                        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
                })
                .unwrap_or(0)
        };

        let booking_id = Uuid::parse_str(get_str("id"))
            .map_err(|_| AppError::Internal("Booking row has no id.".to_string()))?;
        let user_id = Uuid::parse_str(get_str("user_id"))
            .map_err(|_| AppError::Internal("Booking row has no user_id.".to_string()))?;
        let payment_method = PaymentMethod::parse(get_str("payment_method")).ok_or_else(|| {
            AppError::Internal("Booking row has an unknown payment method.".to_string())
        })?;
        let payment_status = PaymentStatus::parse(get_str("payment_status")).ok_or_else(|| {
            AppError::Internal("Booking row has an unknown payment status.".to_string())
        })?;

        Ok(Self {
            booking_id,
            booking_ref: get_str("booking_ref").to_string(),
            user_id,
            partner_id,
            payment_method,
            payment_status,
            total_amount: get_amount("total_amount"),
            taxes: get_amount("taxes"),
            admin_commission: get_amount("admin_commission"),
            partner_payout: get_amount("partner_payout"),
            wallet_deduction: get_amount("wallet_deduction"),
        })
    }
}

/// Wallet movements performed at booking creation.
///
/// - `wallet`: the guest pays now; a full deduction settles the partner
///   and treasury immediately, a partial one parks the deduction with the
///   treasury and fronts the platform cut from the partner.
/// - `pay_at_hotel`: no guest money yet, but the partner fronts the
///   platform cut so the treasury collects at booking time regardless.
/// - `online`: nothing moves until the gateway confirms (see
///   [`plan_gateway_capture`]).
pub fn plan_creation(money: &BookingMoney) -> AppResult<Vec<Move>> {
    let reference = &money.booking_ref;
    match money.payment_method {
        PaymentMethod::Wallet => {
            let deduction = if money.wallet_deduction > 0 {
                money.wallet_deduction
            } else {
                money.total_amount
            };
            if deduction > money.total_amount {
                return Err(AppError::BadRequest(
                    "Wallet deduction exceeds the booking total.".to_string(),
                ));
            }

            let mut moves = vec![Move::debit(
                Party::User,
                deduction,
                TxnCategory::BookingPayment,
                format!("Booking {reference} paid from wallet"),
            )];

            if deduction == money.total_amount {
                moves.push(Move::credit(
                    Party::Partner,
                    money.partner_payout,
                    TxnCategory::BookingPayment,
                    format!("Payout for booking {reference}"),
                ));
                moves.push(Move::credit(
                    Party::Treasury,
                    money.platform_cut(),
                    TxnCategory::Commission,
                    format!("Commission and tax for booking {reference}"),
                ));
            } else {
                moves.push(Move::credit(
                    Party::Treasury,
                    deduction,
                    TxnCategory::BookingAdvance,
                    format!("Wallet advance held for booking {reference}"),
                ));
                moves.push(Move::debit(
                    Party::Partner,
                    money.platform_cut(),
                    TxnCategory::CommissionDeduction,
                    format!("Platform cut fronted for booking {reference}"),
                ));
                moves.push(Move::credit(
                    Party::Treasury,
                    money.platform_cut(),
                    TxnCategory::Commission,
                    format!("Commission and tax for booking {reference}"),
                ));
            }
            Ok(moves)
        }
        PaymentMethod::PayAtHotel => Ok(vec![
            Move::debit(
                Party::Partner,
                money.platform_cut(),
                TxnCategory::CommissionDeduction,
                format!("Platform cut fronted for booking {reference}"),
            ),
            Move::credit(
                Party::Treasury,
                money.platform_cut(),
                TxnCategory::Commission,
                format!("Commission and tax for booking {reference}"),
            ),
        ]),
        PaymentMethod::Online => Ok(Vec::new()),
    }
}

/// Wallet movements when a gateway payment is confirmed: the same
/// settlement as a fully wallet-paid booking, except the guest's wallet is
/// only debited for the pre-applied portion — the gateway collected the rest.
pub fn plan_gateway_capture(money: &BookingMoney) -> Vec<Move> {
    let reference = &money.booking_ref;
    let mut moves = Vec::new();
    if money.wallet_deduction > 0 {
        moves.push(Move::debit(
            Party::User,
            money.wallet_deduction,
            TxnCategory::BookingPayment,
            format!("Wallet portion for booking {reference}"),
        ));
    }
    moves.push(Move::credit(
        Party::Partner,
        money.partner_payout,
        TxnCategory::BookingPayment,
        format!("Payout for booking {reference}"),
    ));
    moves.push(Move::credit(
        Party::Treasury,
        money.platform_cut(),
        TxnCategory::Commission,
        format!("Commission and tax for booking {reference}"),
    ));
    moves
}

/// Undo exactly what creation (or capture) did, conditioned on how the
/// booking was paid. Reversal debits use overdraft categories: the wallets
/// being clawed back may already have spent the money.
pub fn plan_cancellation(money: &BookingMoney) -> Vec<Move> {
    let reference = &money.booking_ref;
    match money.payment_method {
        PaymentMethod::PayAtHotel => reverse_platform_cut(money),
        PaymentMethod::Wallet | PaymentMethod::Online => match money.payment_status {
            PaymentStatus::Paid => vec![
                Move::credit(
                    Party::User,
                    money.total_amount,
                    TxnCategory::Refund,
                    format!("Refund for cancelled booking {reference}"),
                ),
                Move::debit(
                    Party::Partner,
                    money.partner_payout,
                    TxnCategory::RefundDeduction,
                    format!("Payout reversed for cancelled booking {reference}"),
                ),
                Move::debit(
                    Party::Treasury,
                    money.platform_cut(),
                    TxnCategory::RefundDeduction,
                    format!("Commission and tax reversed for cancelled booking {reference}"),
                ),
            ],
            PaymentStatus::Partial => {
                let mut moves = vec![
                    Move::credit(
                        Party::User,
                        money.wallet_deduction,
                        TxnCategory::Refund,
                        format!("Wallet advance refunded for cancelled booking {reference}"),
                    ),
                    Move::debit(
                        Party::Treasury,
                        money.wallet_deduction,
                        TxnCategory::RefundDeduction,
                        format!("Wallet advance released for cancelled booking {reference}"),
                    ),
                ];
                moves.extend(reverse_platform_cut(money));
                moves
            }
            _ => Vec::new(),
        },
    }
}

/// No-show keeps the guest's money with the platform: the partner's payout
/// moves to the treasury as a penalty pool instead of being refunded. Any
/// fronted platform cut is returned to the partner — they never collected
/// payment for the stay.
pub fn plan_no_show(money: &BookingMoney) -> Vec<Move> {
    let reference = &money.booking_ref;
    let mut moves = Vec::new();

    if matches!(money.payment_method, PaymentMethod::PayAtHotel)
        || matches!(money.payment_status, PaymentStatus::Partial)
    {
        moves.extend(reverse_platform_cut(money));
    }

    moves.push(Move::debit(
        Party::Partner,
        money.partner_payout,
        TxnCategory::NoShowPenalty,
        format!("No-show penalty for booking {reference}"),
    ));
    moves.push(Move::credit(
        Party::Treasury,
        money.partner_payout,
        TxnCategory::NoShowPenalty,
        format!("No-show penalty collected for booking {reference}"),
    ));
    moves
}

/// Remainder collected at the property. For a partial-wallet booking the
/// advance parked with the treasury now belongs to the partner; a plain
/// pay-at-hotel booking moves nothing (the partner holds the cash and the
/// platform cut was already fronted).
pub fn plan_mark_paid(money: &BookingMoney) -> Vec<Move> {
    let reference = &money.booking_ref;
    if money.payment_status == PaymentStatus::Partial && money.wallet_deduction > 0 {
        return vec![
            Move::debit(
                Party::Treasury,
                money.wallet_deduction,
                TxnCategory::BookingAdvance,
                format!("Wallet advance released for booking {reference}"),
            ),
            Move::credit(
                Party::Partner,
                money.wallet_deduction,
                TxnCategory::BookingPayment,
                format!("Wallet advance paid out for booking {reference}"),
            ),
        ];
    }
    Vec::new()
}

fn reverse_platform_cut(money: &BookingMoney) -> Vec<Move> {
    let reference = &money.booking_ref;
    vec![
        Move::credit(
            Party::Partner,
            money.platform_cut(),
            TxnCategory::CommissionRefund,
            format!("Fronted platform cut returned for booking {reference}"),
        ),
        Move::debit(
            Party::Treasury,
            money.platform_cut(),
            TxnCategory::RefundDeduction,
            format!("Platform cut reversed for booking {reference}"),
        ),
    ]
}

/// The three wallets a plan executes against.
#[derive(Debug, Clone, Copy)]
pub struct PartyWallets {
    pub user: Uuid,
    pub partner: Uuid,
    pub treasury: Uuid,
}

pub async fn resolve_party_wallets(
    conn: &mut PgConnection,
    money: &BookingMoney,
    treasury_owner: Uuid,
) -> AppResult<PartyWallets> {
    let user = ensure_wallet_tx(conn, money.user_id, OwnerKind::User).await?;
    let partner = ensure_wallet_tx(conn, money.partner_id, OwnerKind::Partner).await?;
    let treasury = ensure_wallet_tx(conn, treasury_owner, OwnerKind::Admin).await?;
    Ok(PartyWallets {
        user,
        partner,
        treasury,
    })
}

/// Execute a plan on an open transaction. Zero-amount moves are skipped
/// (a free booking has no payout to push around). Any failure aborts the
/// whole transaction, so the three-party ledger never ends up lopsided.
pub async fn apply_moves(
    conn: &mut PgConnection,
    wallets: &PartyWallets,
    moves: &[Move],
    reference: &str,
) -> AppResult<()> {
    for movement in moves {
        if movement.amount == 0 {
            continue;
        }
        let wallet_id = match movement.party {
            Party::User => wallets.user,
            Party::Partner => wallets.partner,
            Party::Treasury => wallets.treasury,
        };
        match movement.direction {
            Direction::Credit => {
                credit_tx(
                    conn,
                    wallet_id,
                    movement.amount,
                    movement.category,
                    &movement.description,
                    reference,
                )
                .await?;
            }
            Direction::Debit => {
                debit_tx(
                    conn,
                    wallet_id,
                    movement.amount,
                    movement.category,
                    &movement.description,
                    reference,
                )
                .await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{
        plan_cancellation, plan_creation, plan_gateway_capture, plan_no_show, BookingMoney, Move,
        Party, PaymentMethod, PaymentStatus,
    };

    fn booking(method: PaymentMethod, status: PaymentStatus) -> BookingMoney {
        // Scenario numbers: ₹1000/night, 2 nights, 10% commission, 12% tax.
        BookingMoney {
            booking_id: Uuid::nil(),
            booking_ref: "BK-TEST".to_string(),
            user_id: Uuid::nil(),
            partner_id: Uuid::nil(),
            payment_method: method,
            payment_status: status,
            total_amount: 2240,
            taxes: 240,
            admin_commission: 200,
            partner_payout: 1800,
            wallet_deduction: 0,
        }
    }

    fn net(moves: &[Move], party: Party) -> i64 {
        moves
            .iter()
            .filter(|m| m.party == party)
            .map(Move::signed_amount)
            .sum()
    }

    #[test]
    fn full_wallet_payment_balances_to_zero() {
        let money = booking(PaymentMethod::Wallet, PaymentStatus::Paid);
        let moves = plan_creation(&money).unwrap();
        assert_eq!(net(&moves, Party::User), -2240);
        assert_eq!(net(&moves, Party::Partner), 1800);
        assert_eq!(net(&moves, Party::Treasury), 440);
        // Internal transfer: the three parties sum to zero.
        let total: i64 = moves.iter().map(Move::signed_amount).sum();
        assert_eq!(total, 0);
    }

    #[test]
    fn cancelling_a_paid_booking_unwinds_every_wallet() {
        let money = booking(PaymentMethod::Wallet, PaymentStatus::Paid);
        let mut all = plan_creation(&money).unwrap();
        all.extend(plan_cancellation(&money));
        for party in [Party::User, Party::Partner, Party::Treasury] {
            assert_eq!(net(&all, party), 0, "{party:?} did not unwind to zero");
        }
    }

    #[test]
    fn pay_at_hotel_fronts_and_returns_the_platform_cut() {
        let money = booking(PaymentMethod::PayAtHotel, PaymentStatus::Pending);
        let creation = plan_creation(&money).unwrap();
        assert_eq!(net(&creation, Party::User), 0);
        assert_eq!(net(&creation, Party::Partner), -440);
        assert_eq!(net(&creation, Party::Treasury), 440);

        let mut all = creation;
        all.extend(plan_cancellation(&money));
        for party in [Party::User, Party::Partner, Party::Treasury] {
            assert_eq!(net(&all, party), 0);
        }
    }

    #[test]
    fn no_show_on_pay_at_hotel_moves_the_payout_to_the_treasury() {
        // Scenario: the front is reversed but the payout penalty stands.
        let money = booking(PaymentMethod::PayAtHotel, PaymentStatus::Pending);
        let mut all = plan_creation(&money).unwrap();
        all.extend(plan_no_show(&money));
        assert_eq!(net(&all, Party::User), 0);
        assert_eq!(net(&all, Party::Partner), -1800);
        assert_eq!(net(&all, Party::Treasury), 1800);
    }

    #[test]
    fn no_show_on_a_paid_booking_keeps_the_guest_money() {
        let money = booking(PaymentMethod::Wallet, PaymentStatus::Paid);
        let mut all = plan_creation(&money).unwrap();
        all.extend(plan_no_show(&money));
        // Guest paid and gets nothing back.
        assert_eq!(net(&all, Party::User), -2240);
        // Partner payout was granted then clawed back.
        assert_eq!(net(&all, Party::Partner), 0);
        // Treasury keeps its cut plus the penalty.
        assert_eq!(net(&all, Party::Treasury), 2240);
    }

    #[test]
    fn partial_wallet_deduction_parks_the_advance_with_the_treasury() {
        let mut money = booking(PaymentMethod::Wallet, PaymentStatus::Partial);
        money.wallet_deduction = 500;
        let creation = plan_creation(&money).unwrap();
        assert_eq!(net(&creation, Party::User), -500);
        assert_eq!(net(&creation, Party::Partner), -440);
        assert_eq!(net(&creation, Party::Treasury), 940);

        let mut all = creation;
        all.extend(plan_cancellation(&money));
        for party in [Party::User, Party::Partner, Party::Treasury] {
            assert_eq!(net(&all, party), 0);
        }
    }

    #[test]
    fn settling_a_partial_booking_hands_the_advance_to_the_partner() {
        let mut money = booking(PaymentMethod::Wallet, PaymentStatus::Partial);
        money.wallet_deduction = 500;
        let mut all = plan_creation(&money).unwrap();
        all.extend(super::plan_mark_paid(&money));
        // Guest's 500 ends up with the partner; the fronted cut stays settled.
        assert_eq!(net(&all, Party::User), -500);
        assert_eq!(net(&all, Party::Partner), 60);
        assert_eq!(net(&all, Party::Treasury), 440);

        let paid = booking(PaymentMethod::PayAtHotel, PaymentStatus::Pending);
        assert!(super::plan_mark_paid(&paid).is_empty());
    }

    #[test]
    fn oversized_wallet_deduction_is_rejected() {
        let mut money = booking(PaymentMethod::Wallet, PaymentStatus::Paid);
        money.wallet_deduction = 5000;
        assert!(plan_creation(&money).is_err());
    }

    #[test]
    fn gateway_capture_matches_the_wallet_settlement() {
        let mut money = booking(PaymentMethod::Online, PaymentStatus::Paid);
        assert!(plan_creation(&money).unwrap().is_empty());

        money.wallet_deduction = 300;
        let moves = plan_gateway_capture(&money);
        assert_eq!(net(&moves, Party::User), -300);
        assert_eq!(net(&moves, Party::Partner), 1800);
        assert_eq!(net(&moves, Party::Treasury), 440);
    }

    #[test]
    fn cancelling_an_unpaid_online_booking_moves_nothing() {
        let money = booking(PaymentMethod::Online, PaymentStatus::Pending);
        assert!(plan_cancellation(&money).is_empty());
    }
}
