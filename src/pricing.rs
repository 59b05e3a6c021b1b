//! Прайс-резолвер: чистые функции цены без обращений к БД.
//!
//! Цены мест фиксированы по категории ряда, закуски считаются по
//! статической таблице. Таблица версионируется, чтобы смена цен была
//! явным изменением, а не тихой правкой констант.

use crate::error::ApiError;
use crate::models::{ConcessionSelection, SeatType};

pub const PRICE_TABLE_VERSION: u32 = 1;

/// Позиция из меню закусок.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ConcessionItem {
    pub id: &'static str,
    pub name: &'static str,
    pub price: i64,
}

pub const CONCESSIONS: &[ConcessionItem] = &[
    ConcessionItem { id: "popcorn", name: "Caramel Popcorn", price: 350 },
    ConcessionItem { id: "coke", name: "Coca-Cola", price: 200 },
    ConcessionItem { id: "nachos", name: "Loaded Nachos", price: 300 },
];

/// Цена места по категории.
pub fn seat_price(seat_type: SeatType) -> i64 {
    match seat_type {
        SeatType::Normal => 200,
        SeatType::Premium => 350,
        SeatType::Recliner => 600,
    }
}

fn concession_price(item_id: &str) -> Option<i64> {
    CONCESSIONS.iter().find(|i| i.id == item_id).map(|i| i.price)
}

/// Сумма по выбранным закускам. Отрицательные количества и неизвестные
/// позиции отклоняются как некорректный ввод.
pub fn concessions_total(selection: &ConcessionSelection) -> Result<i64, ApiError> {
    let mut total: i64 = 0;
    for (item_id, &quantity) in &selection.0 {
        if quantity < 0 {
            return Err(ApiError::InvalidInput(format!(
                "количество для \"{}\" не может быть отрицательным",
                item_id
            )));
        }
        let price = concession_price(item_id).ok_or_else(|| {
            ApiError::InvalidInput(format!("неизвестная позиция меню: {}", item_id))
        })?;
        total += price * quantity;
    }
    Ok(total)
}

/// Сумма по местам.
pub fn seats_total(seat_types: &[SeatType]) -> i64 {
    seat_types.iter().map(|&t| seat_price(t)).sum()
}

/// Полная стоимость заказа: места + закуски.
pub fn total(seat_types: &[SeatType], selection: &ConcessionSelection) -> Result<i64, ApiError> {
    Ok(seats_total(seat_types) + concessions_total(selection)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn selection(items: &[(&str, i64)]) -> ConcessionSelection {
        ConcessionSelection(
            items
                .iter()
                .map(|(id, q)| (id.to_string(), *q))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn two_normal_seats_and_one_popcorn() {
        // 2 × 200 + 1 × 350 = 750
        let amount = total(
            &[SeatType::Normal, SeatType::Normal],
            &selection(&[("popcorn", 1)]),
        )
        .unwrap();
        assert_eq!(amount, 750);
    }

    #[test]
    fn seat_tiers() {
        assert_eq!(seat_price(SeatType::Normal), 200);
        assert_eq!(seat_price(SeatType::Premium), 350);
        assert_eq!(seat_price(SeatType::Recliner), 600);
    }

    #[test]
    fn empty_selection_costs_nothing() {
        assert_eq!(concessions_total(&ConcessionSelection::default()).unwrap(), 0);
        assert_eq!(concessions_total(&selection(&[("coke", 0)])).unwrap(), 0);
    }

    #[test]
    fn negative_quantity_is_rejected() {
        let err = concessions_total(&selection(&[("coke", -1)])).unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[test]
    fn unknown_item_is_rejected() {
        let err = concessions_total(&selection(&[("sushi", 2)])).unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_selection() -> impl Strategy<Value = ConcessionSelection> {
            proptest::collection::btree_map(
                prop_oneof![
                    Just("popcorn".to_string()),
                    Just("coke".to_string()),
                    Just("nachos".to_string())
                ],
                0i64..50,
                0..3,
            )
            .prop_map(ConcessionSelection)
        }

        proptest! {
            #[test]
            fn valid_totals_are_never_negative(sel in arb_selection()) {
                prop_assert!(concessions_total(&sel).unwrap() >= 0);
            }

            #[test]
            fn totals_are_additive(sel in arb_selection(), n in 0usize..6) {
                let seats = vec![SeatType::Premium; n];
                let combined = total(&seats, &sel).unwrap();
                prop_assert_eq!(
                    combined,
                    seats_total(&seats) + concessions_total(&sel).unwrap()
                );
            }
        }
    }
}
