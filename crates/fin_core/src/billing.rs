//! Credit-card billing cycles and installment plans

use chrono::{Datelike, Months, NaiveDate};

/// Bill (`YYYY-MM`) a credit-card purchase falls into.
///
/// Purchases made on or after the closing day go to the next month's bill.
pub fn invoice_month_for(date: NaiveDate, closing_day: u8) -> String {
    let bill = if date.day() >= u32::from(closing_day) {
        add_months(date, 1)
    } else {
        date
    };
    format!("{:04}-{:02}", bill.year(), bill.month())
}

/// `date` shifted by `months`, clamped to the end of shorter months.
pub fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months)).unwrap_or(date)
}

/// Split `total` cents into `count` installments; the remainder goes to the first.
pub fn split_installments(total: i64, count: u32) -> Vec<i64> {
    if count <= 1 {
        return vec![total];
    }
    let n = i64::from(count);
    let base = total / n;
    let remainder = total - base * n;
    (0..count)
        .map(|i| if i == 0 { base + remainder } else { base })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_invoice_month_rolls_after_closing() {
        assert_eq!(invoice_month_for(d(2026, 10, 4), 5), "2026-10");
        assert_eq!(invoice_month_for(d(2026, 10, 5), 5), "2026-11");
        assert_eq!(invoice_month_for(d(2026, 12, 20), 5), "2027-01");
    }

    #[test]
    fn test_add_months_clamps() {
        assert_eq!(add_months(d(2026, 1, 31), 1), d(2026, 2, 28));
    }

    #[test]
    fn test_split_installments_keeps_total() {
        let parts = split_installments(10000, 3);
        assert_eq!(parts, vec![3334, 3333, 3333]);
        assert_eq!(parts.iter().sum::<i64>(), 10000);
        assert_eq!(split_installments(500, 1), vec![500]);
    }
}
