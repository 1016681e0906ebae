//! Company API Routes
//!
//! Per-ticker views over the loaded store. Every section endpoint answers for
//! any known ticker; sections without data come back empty and are listed in
//! `missing_sources`.

use std::collections::BTreeSet;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use analysis_core::{normalize_ticker, BacktestReport, Labeled, PriceBar, TechnicalFeatureRecord};
use company_store::{CompanyRecord, DataSource, FinancialRow};

use crate::{ApiResponse, AppError, AppState};

#[derive(Debug, Serialize)]
pub struct CompanySummary {
    pub ticker: String,
    pub data_types: Vec<DataSource>,
    pub missing_sources: BTreeSet<DataSource>,
}

/// One section of a company record.
#[derive(Debug, Serialize)]
pub struct CompanySection<T> {
    pub ticker: String,
    pub data: T,
    pub missing_sources: BTreeSet<DataSource>,
}

pub fn company_routes() -> Router<AppState> {
    Router::new()
        .route("/api/companies", get(list_companies))
        .route("/api/company/:ticker", get(get_company))
        .route("/api/company/:ticker/financials", get(get_financials))
        .route("/api/company/:ticker/backtests", get(get_backtests))
        .route("/api/company/:ticker/stock_data", get(get_stock_data))
        .route("/api/company/:ticker/historical_features", get(get_historical_features))
        .route("/api/company/:ticker/data_types", get(get_data_types))
}

fn lookup<'a>(state: &'a AppState, raw: &str) -> Result<&'a CompanyRecord, AppError> {
    let ticker = normalize_ticker(raw).map_err(|e| AppError::bad_request(e.to_string()))?;
    state
        .store
        .get(&ticker)
        .ok_or_else(|| AppError::not_found(format!("No data for ticker {}", ticker)))
}

fn section<T>(
    state: &AppState,
    raw: &str,
    pick: impl FnOnce(&CompanyRecord) -> T,
) -> Result<Json<ApiResponse<CompanySection<T>>>, AppError> {
    let company = lookup(state, raw)?;
    Ok(Json(ApiResponse::success(CompanySection {
        ticker: company.ticker.clone(),
        data: pick(company),
        missing_sources: company.missing_sources.clone(),
    })))
}

async fn list_companies(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<CompanySummary>>> {
    let companies = state
        .store
        .companies()
        .map(|c| CompanySummary {
            ticker: c.ticker.clone(),
            data_types: c.data_types(),
            missing_sources: c.missing_sources.clone(),
        })
        .collect();
    Json(ApiResponse::success(companies))
}

async fn get_company(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<ApiResponse<CompanyRecord>>, AppError> {
    let company = lookup(&state, &ticker)?;
    Ok(Json(ApiResponse::success(company.clone())))
}

async fn get_financials(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<ApiResponse<CompanySection<Vec<FinancialRow>>>>, AppError> {
    section(&state, &ticker, |c| c.financials.clone())
}

async fn get_backtests(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<ApiResponse<CompanySection<Option<BacktestReport>>>>, AppError> {
    section(&state, &ticker, |c| c.backtests.clone())
}

async fn get_stock_data(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<ApiResponse<CompanySection<Vec<PriceBar>>>>, AppError> {
    section(&state, &ticker, |c| c.stock_data.clone())
}

async fn get_historical_features(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<ApiResponse<CompanySection<Vec<Labeled<TechnicalFeatureRecord>>>>>, AppError> {
    section(&state, &ticker, |c| c.historical_features.clone())
}

async fn get_data_types(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<ApiResponse<CompanySection<Vec<DataSource>>>>, AppError> {
    section(&state, &ticker, CompanyRecord::data_types)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_router;
    use analysis_core::{
        AnomalyLabel, FinancialRatioRecord, RatioSet, RatioValue, SignalTestResult,
    };
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::NaiveDate;
    use company_store::CompanyDataStore;
    use serde_json::Value;
    use tower::ServiceExt;

    fn store() -> CompanyDataStore {
        let ratio = FinancialRatioRecord {
            ticker_symbol: "AAPL".to_string(),
            period_ending: NaiveDate::from_ymd_opt(2022, 12, 31).unwrap(),
            ratios: RatioSet::from_fn(|_| RatioValue::Valid(0.5)),
        };
        let mut report = BacktestReport::new();
        report.insert(
            "RSI".to_string(),
            SignalTestResult {
                signal_count: 4,
                success_count: 3,
                p_value: Some(0.3125),
            },
        );
        CompanyDataStore::builder()
            .ratios(vec![ratio.clone()])
            .anomalies(vec![Labeled {
                record: ratio,
                anomaly: AnomalyLabel::Outlier,
            }])
            .backtests("msft", report)
            .build()
    }

    async fn get(uri: &str) -> (StatusCode, Value) {
        let app = build_router(AppState::new(store()));
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["companies"], 2);
    }

    #[tokio::test]
    async fn test_list_companies() {
        let (status, body) = get("/api/companies").await;
        assert_eq!(status, StatusCode::OK);
        let tickers: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["ticker"].as_str().unwrap())
            .collect();
        assert_eq!(tickers, vec!["AAPL", "MSFT"]);
    }

    #[tokio::test]
    async fn test_company_is_case_insensitive() {
        let (status, body) = get("/api/company/%20aapl").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["ticker"], "AAPL");
        assert_eq!(body["data"]["financials"][0]["anomaly"], 1);
        assert_eq!(body["data"]["financials"][0]["roa"], 0.5);
    }

    #[tokio::test]
    async fn test_unknown_ticker_is_404() {
        let (status, body) = get("/api/company/ZZZZ").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("ZZZZ"));
    }

    #[tokio::test]
    async fn test_invalid_ticker_is_400() {
        let (status, body) = get("/api/company/AB$CD/financials").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_partial_coverage() {
        let (status, body) = get("/api/company/MSFT/financials").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["data"].as_array().unwrap().is_empty());
        let missing: Vec<&str> = body["data"]["missing_sources"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s.as_str().unwrap())
            .collect();
        assert!(missing.contains(&"ratios"));
        assert!(missing.contains(&"anomalies"));
        assert!(!missing.contains(&"backtests"));

        let (_, body) = get("/api/company/MSFT/backtests").await;
        assert_eq!(body["data"]["data"]["RSI"]["success_count"], 3);

        let (_, body) = get("/api/company/AAPL/backtests").await;
        assert!(body["data"]["data"].is_null());
    }

    #[tokio::test]
    async fn test_data_types() {
        let (status, body) = get("/api/company/AAPL/data_types").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["data"], serde_json::json!(["ratios", "anomalies"]));
    }
}
