use chrono::NaiveDate;

/// Derived-state rules for the fee and result ledgers. Balances, statuses
/// and totals are always recomputed here; values supplied by callers are
/// never trusted.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeStatus {
    Paid,
    Pending,
    Overdue,
}

impl FeeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FeeStatus::Paid => "Paid",
            FeeStatus::Pending => "Pending",
            FeeStatus::Overdue => "Overdue",
        }
    }
}

pub fn fee_balance(total_fee: f64, paid: f64) -> f64 {
    total_fee - paid
}

/// Overdue is derived lazily from the due date; no background job ever
/// flips it.
pub fn fee_status(balance: f64, due_date: Option<NaiveDate>, as_of: NaiveDate) -> FeeStatus {
    if balance <= 0.0 {
        FeeStatus::Paid
    } else if due_date.map(|d| d < as_of).unwrap_or(false) {
        FeeStatus::Overdue
    } else {
        FeeStatus::Pending
    }
}

pub fn result_total(cia_marks: f64, semester_marks: f64) -> f64 {
    cia_marks + semester_marks
}

/// Fixed 10-point scale; unknown grades count as zero.
pub fn grade_points(grade: &str) -> f64 {
    match grade.trim() {
        "A+" => 10.0,
        "A" => 9.0,
        "B+" => 8.0,
        "B" => 7.0,
        "C+" => 6.0,
        "C" => 5.0,
        "D" => 4.0,
        "E" => 3.0,
        "F" => 0.0,
        _ => 0.0,
    }
}

pub fn round_off_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Arithmetic mean over grade points, 2-decimal rounded. `None` when there
/// are no grades to average.
pub fn gpa<'a, I>(grades: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut sum = 0.0;
    let mut count: usize = 0;
    for grade in grades {
        sum += grade_points(grade);
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(round_off_2_decimals(sum / count as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    #[test]
    fn balance_is_total_minus_paid() {
        assert_eq!(fee_balance(50000.0, 20000.0), 30000.0);
        assert_eq!(fee_balance(50000.0, 50000.0), 0.0);
        assert_eq!(fee_balance(50000.0, 60000.0), -10000.0);
    }

    #[test]
    fn paid_iff_balance_nonpositive() {
        let today = d("2024-06-01");
        assert_eq!(fee_status(0.0, Some(d("2024-01-01")), today), FeeStatus::Paid);
        assert_eq!(fee_status(-5.0, Some(d("2024-01-01")), today), FeeStatus::Paid);
        assert_eq!(
            fee_status(100.0, Some(d("2024-12-31")), today),
            FeeStatus::Pending
        );
    }

    #[test]
    fn overdue_when_past_due_and_unpaid() {
        let today = d("2024-06-01");
        assert_eq!(
            fee_status(100.0, Some(d("2024-05-31")), today),
            FeeStatus::Overdue
        );
        // Due today is not yet overdue.
        assert_eq!(
            fee_status(100.0, Some(d("2024-06-01")), today),
            FeeStatus::Pending
        );
        assert_eq!(fee_status(100.0, None, today), FeeStatus::Pending);
    }

    #[test]
    fn result_total_is_component_sum() {
        assert_eq!(result_total(18.0, 62.0), 80.0);
        assert_eq!(result_total(0.0, 0.0), 0.0);
    }

    #[test]
    fn gpa_matches_fixed_table() {
        // A=9, B+=8, A+=10 -> 27/3 = 9.00
        assert_eq!(gpa(["A", "B+", "A+"]), Some(9.0));
        assert_eq!(gpa(["A+", "F"]), Some(5.0));
        // Unknown grades count as 0.
        assert_eq!(gpa(["A+", "??"]), Some(5.0));
        assert_eq!(gpa([]), None);
    }

    #[test]
    fn gpa_rounds_to_two_decimals() {
        // 10 + 9 + 9 = 28/3 = 9.333... -> 9.33
        assert_eq!(gpa(["A+", "A", "A"]), Some(9.33));
        // 8 + 7 + 7 = 22/3 = 7.333 -> 7.33; and a .005-ish case
        assert_eq!(gpa(["B+", "B", "B"]), Some(7.33));
    }
}
