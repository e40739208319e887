use actix_web::{get, web, HttpResponse, Responder};
use serde::Deserialize;
use thiserror::Error;

use crate::model::TransactionType;
use crate::store::{Store, TransactionFilter};

#[derive(Debug, Deserialize)]
pub struct TransactionQuery {
    user_id: Option<String>,
    transaction_type: Option<String>,
    limit: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid user id")]
    InvalidUserId,
    #[error("Invalid transaction_type. Must be 'bet' or 'win'")]
    InvalidTransactionType,
    #[error("Invalid limit parameter")]
    InvalidLimit,
}

// An empty parameter counts as absent, the same as leaving it out entirely.
fn parse_filter(query: &TransactionQuery) -> Result<TransactionFilter, ValidationError> {
    let user_id = match query.user_id.as_deref().filter(|raw| !raw.is_empty()) {
        Some(raw) => Some(raw.parse::<i64>().map_err(|_| ValidationError::InvalidUserId)?),
        None => None,
    };

    let transaction_type = match query
        .transaction_type
        .as_deref()
        .filter(|raw| !raw.is_empty())
    {
        Some(raw) => Some(
            raw.parse::<TransactionType>()
                .map_err(|_| ValidationError::InvalidTransactionType)?,
        ),
        None => None,
    };

    let limit = match query.limit.as_deref().filter(|raw| !raw.is_empty()) {
        Some(raw) => match raw.parse::<i64>() {
            Ok(limit) if limit >= 1 => Some(limit),
            _ => return Err(ValidationError::InvalidLimit),
        },
        None => None,
    };

    Ok(TransactionFilter {
        user_id,
        transaction_type,
        limit,
    })
}

#[tracing::instrument(
    name = "Fetching transactions for /transactions request",
    skip(store)
)]
#[get("/transactions")]
pub async fn get_transactions(
    store: web::Data<Store>,
    query: web::Query<TransactionQuery>,
) -> impl Responder {
    let filter = match parse_filter(&query) {
        Ok(filter) => filter,
        Err(e) => return HttpResponse::BadRequest().body(e.to_string()),
    };

    match store.get_transactions(&filter).await {
        Ok(transactions) => HttpResponse::Ok().json(transactions),
        Err(e) => {
            tracing::error!("Failed to retrieve transactions: {e}");
            HttpResponse::InternalServerError().body(format!("Failed to retrieve transactions: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(
        user_id: Option<&str>,
        transaction_type: Option<&str>,
        limit: Option<&str>,
    ) -> TransactionQuery {
        TransactionQuery {
            user_id: user_id.map(str::to_string),
            transaction_type: transaction_type.map(str::to_string),
            limit: limit.map(str::to_string),
        }
    }

    #[test]
    fn absent_parameters_produce_an_unfiltered_query() {
        let filter = parse_filter(&query(None, None, None)).unwrap();

        assert_eq!(filter, TransactionFilter::default());
    }

    #[test]
    fn empty_parameters_count_as_absent() {
        let filter = parse_filter(&query(Some(""), Some(""), Some(""))).unwrap();

        assert_eq!(filter, TransactionFilter::default());
    }

    #[test]
    fn all_four_filter_shapes_parse() {
        let user_only = parse_filter(&query(Some("3"), None, None)).unwrap();
        assert_eq!(user_only.user_id, Some(3));
        assert_eq!(user_only.transaction_type, None);

        let type_only = parse_filter(&query(None, Some("win"), None)).unwrap();
        assert_eq!(type_only.user_id, None);
        assert_eq!(type_only.transaction_type, Some(TransactionType::Win));

        let both = parse_filter(&query(Some("3"), Some("bet"), Some("10"))).unwrap();
        assert_eq!(both.user_id, Some(3));
        assert_eq!(both.transaction_type, Some(TransactionType::Bet));
        assert_eq!(both.limit, Some(10));
    }

    #[test]
    fn a_non_numeric_user_id_is_rejected() {
        let err = parse_filter(&query(Some("abc"), None, None)).unwrap_err();

        assert_eq!(err, ValidationError::InvalidUserId);
        assert!(err.to_string().contains("Invalid user id"));
    }

    #[test]
    fn an_out_of_set_transaction_type_is_rejected() {
        let err = parse_filter(&query(None, Some("foo"), None)).unwrap_err();

        assert_eq!(err, ValidationError::InvalidTransactionType);
        assert!(err.to_string().contains("Invalid transaction_type"));
    }

    #[test]
    fn a_non_positive_limit_is_rejected() {
        assert_eq!(
            parse_filter(&query(None, None, Some("0"))).unwrap_err(),
            ValidationError::InvalidLimit
        );
        assert_eq!(
            parse_filter(&query(None, None, Some("-5"))).unwrap_err(),
            ValidationError::InvalidLimit
        );
        assert_eq!(
            parse_filter(&query(None, None, Some("ten"))).unwrap_err(),
            ValidationError::InvalidLimit
        );
    }
}
