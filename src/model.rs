use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Bet,
    Win,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Bet => "bet",
            TransactionType::Win => "win",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown transaction type: {0}")]
pub struct UnknownTransactionType(pub String);

impl FromStr for TransactionType {
    type Err = UnknownTransactionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bet" => Ok(TransactionType::Bet),
            "win" => Ok(TransactionType::Win),
            other => Err(UnknownTransactionType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub user_id: i64,
    pub transaction_type: TransactionType,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Draws one synthetic transaction. The timestamp is assigned here and
    /// never mutated afterwards.
    pub fn generate() -> Transaction {
        let mut rng = rand::thread_rng();

        let transaction_type = match rng.gen_range(0..2) {
            0 => TransactionType::Bet,
            _ => TransactionType::Win,
        };

        Transaction {
            user_id: rng.gen_range(1..=5),
            transaction_type,
            // Two decimal places, display/storage convention
            amount: (rng.gen::<f64>() * 100.0).round() / 100.0,
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{user_id: {}, transaction_type: {}, amount: {:.2}, timestamp: {}}}",
            self.user_id,
            self.transaction_type,
            self.amount,
            self.timestamp.to_rfc3339()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_transactions_are_well_formed() {
        for _ in 0..100 {
            let transaction = Transaction::generate();

            assert!((1..=5).contains(&transaction.user_id));
            assert!(matches!(
                transaction.transaction_type,
                TransactionType::Bet | TransactionType::Win
            ));
            assert!(transaction.amount >= 0.0);

            let cents = transaction.amount * 100.0;
            assert!((cents - cents.round()).abs() < 1e-9);
        }
    }

    #[test]
    fn transaction_survives_a_json_round_trip() {
        let transaction = Transaction::generate();

        let encoded = serde_json::to_string(&transaction).expect("failed to encode");
        let decoded: Transaction = serde_json::from_str(&encoded).expect("failed to decode");

        assert_eq!(transaction, decoded);
    }

    #[test]
    fn transaction_types_use_lowercase_wire_names() {
        assert_eq!(
            serde_json::to_string(&TransactionType::Bet).unwrap(),
            r#""bet""#
        );
        assert_eq!(
            serde_json::to_string(&TransactionType::Win).unwrap(),
            r#""win""#
        );
    }

    #[test]
    fn decoding_rejects_out_of_set_transaction_types() {
        let raw = r#"{"user_id":3,"transaction_type":"deposit","amount":12.5,"timestamp":"2026-08-07T12:00:00Z"}"#;

        assert!(serde_json::from_str::<Transaction>(raw).is_err());
    }

    #[test]
    fn parsing_accepts_exactly_bet_and_win() {
        assert_eq!("bet".parse::<TransactionType>(), Ok(TransactionType::Bet));
        assert_eq!("win".parse::<TransactionType>(), Ok(TransactionType::Win));
        assert!("Bet".parse::<TransactionType>().is_err());
        assert!("foo".parse::<TransactionType>().is_err());
        assert!("".parse::<TransactionType>().is_err());
    }
}
