//! Shared API response types

use serde::Serialize;

use crate::models::{Account, PagedResult};
use crate::services::token::TokenPair;

/// `{ "account": ... }`
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub account: Account,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self { account }
    }
}

/// `{ "tokens": ... }`
#[derive(Debug, Serialize)]
pub struct TokensResponse {
    pub tokens: TokenPair,
}

/// Paginated list response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

impl<T> From<PagedResult<T>> for PageResponse<T> {
    fn from(result: PagedResult<T>) -> Self {
        let total_pages = result.total_pages();
        Self {
            items: result.items,
            total: result.total,
            page: result.page,
            limit: result.limit,
            total_pages,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}
