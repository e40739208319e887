mod transactions;

pub use transactions::get_transactions;
