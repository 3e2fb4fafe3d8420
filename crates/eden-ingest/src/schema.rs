//! Dataset catalogue
//!
//! Each provider dataset maps to one field schema, one merge key and one table
//! per reporting period. The column tables below mirror the store's DDL; the
//! provider's camelCase names lower-case to the persisted column names.

use eden_common::FieldSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::IngestError;
use crate::reconcile::{ReconcileError, ReconcileSpec};

/// Identity columns owned by the store, never fetched or compared
pub const IDENTITY_COLUMNS: &[&str] = &["id", "company_id"];

/// Provider datasets handled by the ingester
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dataset {
    Profile,
    IncomeStatement,
    BalanceSheetStatement,
    CashFlowStatement,
    EnterpriseValues,
}

impl Dataset {
    pub const ALL: [Dataset; 5] = [
        Dataset::Profile,
        Dataset::IncomeStatement,
        Dataset::BalanceSheetStatement,
        Dataset::CashFlowStatement,
        Dataset::EnterpriseValues,
    ];

    /// Path segment of the provider endpoint
    pub fn provider_path(self) -> &'static str {
        match self {
            Dataset::Profile => "profile",
            Dataset::IncomeStatement => "income-statement",
            Dataset::BalanceSheetStatement => "balance-sheet-statement",
            Dataset::CashFlowStatement => "cash-flow-statement",
            Dataset::EnterpriseValues => "enterprise-values",
        }
    }

    /// Whether the provider reports this dataset per period
    pub fn is_periodic(self) -> bool {
        matches!(
            self,
            Dataset::IncomeStatement | Dataset::BalanceSheetStatement | Dataset::CashFlowStatement
        )
    }

    /// Table holding this dataset for the given period, if the combination exists
    pub fn table(self, period: Option<Period>) -> Option<&'static str> {
        match (self, period) {
            (Dataset::Profile, _) => Some("company"),
            (Dataset::IncomeStatement, Some(Period::Annual)) => Some("income_statement_fy"),
            (Dataset::IncomeStatement, Some(Period::Quarter)) => Some("income_statement_quarter"),
            (Dataset::BalanceSheetStatement, Some(Period::Annual)) => Some("balance_sheet_fy"),
            (Dataset::BalanceSheetStatement, Some(Period::Quarter)) => Some("balance_sheet_quarter"),
            (Dataset::CashFlowStatement, Some(Period::Annual)) => Some("cash_flow_statement_fy"),
            (Dataset::CashFlowStatement, Some(Period::Quarter)) => {
                Some("cash_flow_statement_quarter")
            },
            (Dataset::EnterpriseValues, Some(Period::Annual)) => Some("shares_fy"),
            _ => None,
        }
    }

    /// Schema, merge key and excluded fields for reconciliation
    pub fn spec(self) -> Result<&'static ReconcileSpec, IngestError> {
        let cell: &'static LazyLock<Result<ReconcileSpec, ReconcileError>> = match self {
            Dataset::Profile => &PROFILE_SPEC,
            Dataset::IncomeStatement => &INCOME_STATEMENT_SPEC,
            Dataset::BalanceSheetStatement => &BALANCE_SHEET_SPEC,
            Dataset::CashFlowStatement => &CASH_FLOW_SPEC,
            Dataset::EnterpriseValues => &SHARES_SPEC,
        };
        LazyLock::force(cell).as_ref().map_err(|source| IngestError::InvalidSchema {
            dataset: self,
            source: source.clone(),
        })
    }

    /// Units of work this dataset contributes for a period selection
    pub fn targets(self, selection: PeriodSelection) -> Vec<Target> {
        if self == Dataset::Profile {
            return vec![Target::new(self, None)];
        }
        selection
            .periods()
            .iter()
            .filter(|p| self.table(Some(**p)).is_some())
            .map(|p| Target::new(self, Some(*p)))
            .collect()
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.provider_path())
    }
}

impl FromStr for Dataset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        match normalized.as_str() {
            "profile" | "company" => Ok(Dataset::Profile),
            "income-statement" | "income" => Ok(Dataset::IncomeStatement),
            "balance-sheet-statement" | "balance-sheet" => Ok(Dataset::BalanceSheetStatement),
            "cash-flow-statement" | "cash-flow" => Ok(Dataset::CashFlowStatement),
            "enterprise-values" | "shares" => Ok(Dataset::EnterpriseValues),
            _ => Err(format!("Unknown dataset: {}", s)),
        }
    }
}

/// Reporting period of a periodic dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "quarter")]
    Quarter,
    #[serde(rename = "fy", alias = "annual")]
    Annual,
}

impl Period {
    /// Value of the provider's `period` query parameter
    pub fn provider_value(self) -> &'static str {
        match self {
            Period::Quarter => "quarter",
            Period::Annual => "annual",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Quarter => f.write_str("quarter"),
            Period::Annual => f.write_str("fy"),
        }
    }
}

/// Which periods a run ingests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodSelection {
    #[default]
    Quarter,
    #[serde(alias = "annual")]
    Fy,
    All,
}

impl PeriodSelection {
    pub fn periods(self) -> &'static [Period] {
        match self {
            PeriodSelection::Quarter => &[Period::Quarter],
            PeriodSelection::Fy => &[Period::Annual],
            PeriodSelection::All => &[Period::Annual, Period::Quarter],
        }
    }
}

impl fmt::Display for PeriodSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodSelection::Quarter => f.write_str("quarter"),
            PeriodSelection::Fy => f.write_str("fy"),
            PeriodSelection::All => f.write_str("all"),
        }
    }
}

impl FromStr for PeriodSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "quarter" | "q" => Ok(PeriodSelection::Quarter),
            "fy" | "annual" | "year" => Ok(PeriodSelection::Fy),
            "all" | "both" => Ok(PeriodSelection::All),
            _ => Err(format!("Invalid period: {} (expected quarter, fy or all)", s)),
        }
    }
}

/// One dataset at one period: a single provider call and a single table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target {
    pub dataset: Dataset,
    pub period: Option<Period>,
}

impl Target {
    pub fn new(dataset: Dataset, period: Option<Period>) -> Self {
        Self { dataset, period }
    }

    pub fn table(&self) -> Option<&'static str> {
        self.dataset.table(self.period)
    }

    /// Period to send to the provider, if the endpoint takes one
    pub fn query_period(&self) -> Option<Period> {
        self.period.filter(|_| self.dataset.is_periodic())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.period {
            Some(period) if self.dataset.is_periodic() => write!(f, "{}/{}", self.dataset, period),
            _ => write!(f, "{}", self.dataset),
        }
    }
}

/// Every target for a dataset list and period selection, in dataset order
pub fn plan(datasets: &[Dataset], selection: PeriodSelection) -> Vec<Target> {
    datasets.iter().flat_map(|d| d.targets(selection)).collect()
}

// ============================================================================
// Column tables
// ============================================================================

const COMPANY_COLUMNS: &[(&str, &str)] = &[
    ("symbol", "text"),
    ("companyName", "text"),
    ("currency", "text"),
    ("cik", "bigint"),
    ("isin", "text"),
    ("cusip", "bigint"),
    ("exchange", "text"),
    ("exchangeShortName", "text"),
    ("industry", "text"),
    ("website", "text"),
    ("description", "text"),
    ("ceo", "text"),
    ("sector", "text"),
    ("country", "text"),
    ("fullTimeEmployees", "int"),
    ("phone", "text"),
    ("address", "text"),
    ("city", "text"),
    ("state", "text"),
    ("zip", "text"),
    ("image", "text"),
    ("ipoDate", "date"),
    ("isEtf", "bool"),
    ("isActivelyTrading", "bool"),
    ("isAdr", "bool"),
    ("isFund", "bool"),
];

const STATEMENT_HEADER: &[(&str, &str)] = &[
    ("date", "date"),
    ("symbol", "text"),
    ("reportedCurrency", "text"),
    ("cik", "int"),
    ("fillingDate", "date"),
    ("acceptedDate", "timestamp"),
    ("calendarYear", "smallint"),
    ("period", "text"),
];

const STATEMENT_LINKS: &[(&str, &str)] = &[("link", "text"), ("finalLink", "text")];

const INCOME_STATEMENT_COLUMNS: &[(&str, &str)] = &[
    ("revenue", "bigint"),
    ("costOfRevenue", "bigint"),
    ("grossProfit", "bigint"),
    ("grossProfitRatio", "real"),
    ("researchAndDevelopmentExpenses", "bigint"),
    ("generalAndAdministrativeExpenses", "bigint"),
    ("sellingAndMarketingExpenses", "bigint"),
    ("sellingGeneralAndAdministrativeExpenses", "bigint"),
    ("otherExpenses", "bigint"),
    ("operatingExpenses", "bigint"),
    ("costAndExpenses", "bigint"),
    ("interestIncome", "bigint"),
    ("interestExpense", "bigint"),
    ("depreciationAndAmortization", "bigint"),
    ("ebitda", "bigint"),
    ("ebitdaratio", "real"),
    ("operatingIncome", "bigint"),
    ("operatingIncomeRatio", "real"),
    ("totalOtherIncomeExpensesNet", "bigint"),
    ("incomeBeforeTax", "bigint"),
    ("incomeBeforeTaxRatio", "real"),
    ("incomeTaxExpense", "bigint"),
    ("netIncome", "bigint"),
    ("netIncomeRatio", "real"),
    ("eps", "real"),
    ("epsdiluted", "real"),
    ("weightedAverageShsOut", "bigint"),
    ("weightedAverageShsOutDil", "bigint"),
];

const BALANCE_SHEET_COLUMNS: &[(&str, &str)] = &[
    ("cashAndCashEquivalents", "bigint"),
    ("shortTermInvestments", "bigint"),
    ("cashAndShortTermInvestments", "bigint"),
    ("netReceivables", "bigint"),
    ("inventory", "bigint"),
    ("otherCurrentAssets", "bigint"),
    ("totalCurrentAssets", "bigint"),
    ("propertyPlantEquipmentNet", "bigint"),
    ("goodwill", "bigint"),
    ("intangibleAssets", "bigint"),
    ("goodwillAndIntangibleAssets", "bigint"),
    ("longTermInvestments", "bigint"),
    ("taxAssets", "bigint"),
    ("otherNonCurrentAssets", "bigint"),
    ("totalNonCurrentAssets", "bigint"),
    ("otherAssets", "bigint"),
    ("totalAssets", "bigint"),
    ("accountPayables", "bigint"),
    ("shortTermDebt", "bigint"),
    ("taxPayables", "bigint"),
    ("deferredRevenue", "bigint"),
    ("otherCurrentLiabilities", "bigint"),
    ("totalCurrentLiabilities", "bigint"),
    ("longTermDebt", "bigint"),
    ("deferredRevenueNonCurrent", "bigint"),
    ("deferredTaxLiabilitiesNonCurrent", "bigint"),
    ("otherNonCurrentLiabilities", "bigint"),
    ("totalNonCurrentLiabilities", "bigint"),
    ("otherLiabilities", "bigint"),
    ("capitalLeaseObligations", "bigint"),
    ("totalLiabilities", "bigint"),
    ("preferredStock", "bigint"),
    ("commonStock", "bigint"),
    ("retainedEarnings", "bigint"),
    ("accumulatedOtherComprehensiveIncomeLoss", "bigint"),
    ("othertotalStockholdersEquity", "bigint"),
    ("totalStockholdersEquity", "bigint"),
    ("totalEquity", "bigint"),
    ("totalLiabilitiesAndStockholdersEquity", "bigint"),
    ("minorityInterest", "bigint"),
    ("totalLiabilitiesAndTotalEquity", "bigint"),
    ("totalInvestments", "bigint"),
    ("totalDebt", "bigint"),
    ("netDebt", "bigint"),
];

const CASH_FLOW_COLUMNS: &[(&str, &str)] = &[
    ("netIncome", "bigint"),
    ("depreciationAndAmortization", "bigint"),
    ("deferredIncomeTax", "bigint"),
    ("stockBasedCompensation", "bigint"),
    ("changeInWorkingCapital", "bigint"),
    ("accountsReceivables", "bigint"),
    ("inventory", "bigint"),
    ("accountsPayables", "bigint"),
    ("otherWorkingCapital", "bigint"),
    ("otherNonCashItems", "bigint"),
    ("netCashProvidedByOperatingActivities", "bigint"),
    ("investmentsInPropertyPlantAndEquipment", "bigint"),
    ("acquisitionsNet", "bigint"),
    ("purchasesOfInvestments", "bigint"),
    ("salesMaturitiesOfInvestments", "bigint"),
    ("otherInvestingActivites", "bigint"),
    ("netCashUsedForInvestingActivites", "bigint"),
    ("debtRepayment", "bigint"),
    ("commonStockIssued", "bigint"),
    ("commonStockRepurchased", "bigint"),
    ("dividendsPaid", "bigint"),
    ("otherFinancingActivites", "bigint"),
    ("netCashUsedProvidedByFinancingActivities", "bigint"),
    ("effectOfForexChangesOnCash", "bigint"),
    ("netChangeInCash", "bigint"),
    ("cashAtEndOfPeriod", "bigint"),
    ("cashAtBeginningOfPeriod", "bigint"),
    ("operatingCashFlow", "bigint"),
    ("capitalExpenditure", "bigint"),
    ("freeCashFlow", "bigint"),
];

const SHARES_COLUMNS: &[(&str, &str)] = &[("date", "date"), ("numberOfShares", "bigint")];

const STATEMENT_MERGE_KEY: &[&str] = &["calendaryear", "period"];

static PROFILE_SPEC: LazyLock<Result<ReconcileSpec, ReconcileError>> =
    LazyLock::new(|| build_spec(COMPANY_COLUMNS, &["symbol"]));
static INCOME_STATEMENT_SPEC: LazyLock<Result<ReconcileSpec, ReconcileError>> =
    LazyLock::new(|| build_statement_spec(INCOME_STATEMENT_COLUMNS));
static BALANCE_SHEET_SPEC: LazyLock<Result<ReconcileSpec, ReconcileError>> =
    LazyLock::new(|| build_statement_spec(BALANCE_SHEET_COLUMNS));
static CASH_FLOW_SPEC: LazyLock<Result<ReconcileSpec, ReconcileError>> =
    LazyLock::new(|| build_statement_spec(CASH_FLOW_COLUMNS));
static SHARES_SPEC: LazyLock<Result<ReconcileSpec, ReconcileError>> =
    LazyLock::new(|| build_spec(SHARES_COLUMNS, &["date"]));

fn build_statement_spec(body: &[(&str, &str)]) -> Result<ReconcileSpec, ReconcileError> {
    let columns: Vec<(&str, &str)> = STATEMENT_HEADER
        .iter()
        .chain(body)
        .chain(STATEMENT_LINKS)
        .copied()
        .collect();
    build_spec(&columns, STATEMENT_MERGE_KEY)
}

fn build_spec(
    columns: &[(&str, &str)],
    merge_key: &[&str],
) -> Result<ReconcileSpec, ReconcileError> {
    let schema = FieldSchema::from_sql_pairs(columns)?;
    ReconcileSpec::new(schema, merge_key, IDENTITY_COLUMNS)
}
