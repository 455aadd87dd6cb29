use crate::models::{
    DimensionFilter, Invoice, InvoiceDateRow, InvoiceDimRow, InvoiceExportRow, InvoiceLine,
    InvoiceRef, InvoiceSummary, LineCadenceRow, LineCategoryLite, LineCategoryRow, LineSpendRow,
    ReportFilter, SkuCatalogEntry,
};
use sqlx::{PgPool, Postgres, QueryBuilder};

/// IN 查询分批大小: 每批最多100个发票ID
pub const INVOICE_ID_BATCH_SIZE: usize = 100;

const INVOICE_COLUMNS: &str = "id, invoice_date, source, invoice_total, location, \
     email_subject, pdf_url, status, invoice_number, vendor_name, subtotal, tax, shipping, total";

/// 追加日期区间过滤 (任一端缺省即开区间)
fn push_date_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &ReportFilter) {
    if let Some(date_from) = filter.date_from {
        qb.push(" AND invoice_date >= ").push_bind(date_from);
    }
    if let Some(date_to) = filter.date_to {
        qb.push(" AND invoice_date <= ").push_bind(date_to);
    }
}

/// 追加门店过滤: 单值 ILIKE 模糊, 多值 = ANY 精确
fn push_location_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &ReportFilter) {
    match filter.location_filter() {
        DimensionFilter::None => {}
        DimensionFilter::Like(value) => {
            qb.push(" AND location ILIKE ")
                .push_bind(format!("%{}%", value));
        }
        DimensionFilter::AnyOf(values) => {
            qb.push(" AND location = ANY(").push_bind(values).push(")");
        }
    }
}

/// 追加明细品类过滤
/// 未显式指定品类时默认剔除 "%ignore%"; 集合过滤叠加剔除, 单值模糊替代剔除
fn push_line_category_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &ReportFilter) {
    match filter.category_filter() {
        DimensionFilter::None => {
            qb.push(" AND category NOT ILIKE '%ignore%'");
        }
        DimensionFilter::Like(value) => {
            qb.push(" AND category ILIKE ")
                .push_bind(format!("%{}%", value));
        }
        DimensionFilter::AnyOf(values) => {
            qb.push(" AND category NOT ILIKE '%ignore%' AND category = ANY(")
                .push_bind(values)
                .push(")");
        }
    }
}

/// 查询符合过滤条件的发票 (浏览页, 按日期降序)
pub async fn list_invoices(
    pool: &PgPool,
    filter: &ReportFilter,
) -> Result<Vec<Invoice>, sqlx::Error> {
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM invoices WHERE 1=1", INVOICE_COLUMNS));
    push_date_filter(&mut qb, filter);
    push_location_filter(&mut qb, filter);

    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        qb.push(" AND (source ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email_subject ILIKE ")
            .push_bind(pattern)
            .push(")");
    }

    qb.push(" ORDER BY invoice_date DESC");
    qb.build_query_as::<Invoice>().fetch_all(pool).await
}

/// 仅查询符合过滤条件的发票ID
pub async fn list_invoice_ids(
    pool: &PgPool,
    filter: &ReportFilter,
) -> Result<Vec<i64>, sqlx::Error> {
    let mut qb = QueryBuilder::new("SELECT id FROM invoices WHERE 1=1");
    push_date_filter(&mut qb, filter);
    push_location_filter(&mut qb, filter);
    qb.build_query_scalar::<i64>().fetch_all(pool).await
}

/// 查询发票元数据投影 (明细行回挂用, 按日期降序)
pub async fn list_invoice_refs(
    pool: &PgPool,
    filter: &ReportFilter,
) -> Result<Vec<InvoiceRef>, sqlx::Error> {
    let mut qb = QueryBuilder::new(
        "SELECT id, invoice_date, invoice_number, source, location, pdf_url \
         FROM invoices WHERE 1=1",
    );
    push_date_filter(&mut qb, filter);
    push_location_filter(&mut qb, filter);
    qb.push(" ORDER BY invoice_date DESC");
    qb.build_query_as::<InvoiceRef>().fetch_all(pool).await
}

/// 查询发票维度投影 (id + 门店)
pub async fn list_invoice_dims(
    pool: &PgPool,
    filter: &ReportFilter,
) -> Result<Vec<InvoiceDimRow>, sqlx::Error> {
    let mut qb = QueryBuilder::new("SELECT id, location FROM invoices WHERE 1=1");
    push_date_filter(&mut qb, filter);
    push_location_filter(&mut qb, filter);
    qb.build_query_as::<InvoiceDimRow>().fetch_all(pool).await
}

/// 查询发票日期投影 (id + 日期)
pub async fn list_invoice_dates(
    pool: &PgPool,
    filter: &ReportFilter,
) -> Result<Vec<InvoiceDateRow>, sqlx::Error> {
    let mut qb = QueryBuilder::new("SELECT id, invoice_date FROM invoices WHERE 1=1");
    push_date_filter(&mut qb, filter);
    qb.build_query_as::<InvoiceDateRow>().fetch_all(pool).await
}

/// 查询最贵发票投影 (按总额降序 - 大金额在前)
pub async fn list_invoice_summaries(
    pool: &PgPool,
    filter: &ReportFilter,
) -> Result<Vec<InvoiceSummary>, sqlx::Error> {
    let mut qb = QueryBuilder::new(
        "SELECT id, invoice_date, invoice_number, source, location, invoice_total, pdf_url \
         FROM invoices WHERE 1=1",
    );
    push_date_filter(&mut qb, filter);
    push_location_filter(&mut qb, filter);
    qb.push(" ORDER BY invoice_total DESC");
    qb.build_query_as::<InvoiceSummary>().fetch_all(pool).await
}

/// 按发票ID集合分批查询完整明细行
/// sku 提供时按商品编码模糊限定
pub async fn list_lines_full(
    pool: &PgPool,
    invoice_ids: &[i64],
    filter: &ReportFilter,
    sku: Option<&str>,
) -> Result<Vec<InvoiceLine>, sqlx::Error> {
    let mut rows = Vec::new();
    for chunk in invoice_ids.chunks(INVOICE_ID_BATCH_SIZE) {
        let mut qb = QueryBuilder::new(
            "SELECT id, invoice_id, line_number, sku, description, uom, qty, unit_price, \
             line_total, tax, category, created_at \
             FROM invoice_lines WHERE invoice_id = ANY(",
        );
        qb.push_bind(chunk.to_vec()).push(")");
        push_line_category_filter(&mut qb, filter);
        if let Some(sku) = sku {
            qb.push(" AND sku ILIKE ").push_bind(format!("%{}%", sku));
        }
        rows.extend(qb.build_query_as::<InvoiceLine>().fetch_all(pool).await?);
    }
    Ok(rows)
}

/// 分批查询明细消费投影 (Top SKU 聚合用)
pub async fn list_line_spend(
    pool: &PgPool,
    invoice_ids: &[i64],
    filter: &ReportFilter,
) -> Result<Vec<LineSpendRow>, sqlx::Error> {
    let mut rows = Vec::new();
    for chunk in invoice_ids.chunks(INVOICE_ID_BATCH_SIZE) {
        let mut qb = QueryBuilder::new(
            "SELECT sku, description, category, line_total \
             FROM invoice_lines WHERE invoice_id = ANY(",
        );
        qb.push_bind(chunk.to_vec()).push(")");
        push_line_category_filter(&mut qb, filter);
        rows.extend(qb.build_query_as::<LineSpendRow>().fetch_all(pool).await?);
    }
    Ok(rows)
}

/// 分批查询明细品类投影 (热力图/看板/波动用)
pub async fn list_line_categories(
    pool: &PgPool,
    invoice_ids: &[i64],
    filter: &ReportFilter,
) -> Result<Vec<LineCategoryRow>, sqlx::Error> {
    let mut rows = Vec::new();
    for chunk in invoice_ids.chunks(INVOICE_ID_BATCH_SIZE) {
        let mut qb = QueryBuilder::new(
            "SELECT invoice_id, category, line_total \
             FROM invoice_lines WHERE invoice_id = ANY(",
        );
        qb.push_bind(chunk.to_vec()).push(")");
        push_line_category_filter(&mut qb, filter);
        rows.extend(qb.build_query_as::<LineCategoryRow>().fetch_all(pool).await?);
    }
    Ok(rows)
}

/// 分批查询明细品类轻量投影
/// 最贵发票的品类匹配在内存中做, 这里不追加任何品类条件
pub async fn list_line_categories_lite(
    pool: &PgPool,
    invoice_ids: &[i64],
) -> Result<Vec<LineCategoryLite>, sqlx::Error> {
    let mut rows = Vec::new();
    for chunk in invoice_ids.chunks(INVOICE_ID_BATCH_SIZE) {
        let mut qb = QueryBuilder::new(
            "SELECT invoice_id, category FROM invoice_lines WHERE invoice_id = ANY(",
        );
        qb.push_bind(chunk.to_vec()).push(")");
        rows.extend(
            qb.build_query_as::<LineCategoryLite>()
                .fetch_all(pool)
                .await?,
        );
    }
    Ok(rows)
}

/// 分批查询明细采购时间投影 (补货节奏/预测用)
pub async fn list_line_cadence(
    pool: &PgPool,
    invoice_ids: &[i64],
    filter: &ReportFilter,
    sku: Option<&str>,
) -> Result<Vec<LineCadenceRow>, sqlx::Error> {
    let mut rows = Vec::new();
    for chunk in invoice_ids.chunks(INVOICE_ID_BATCH_SIZE) {
        let mut qb = QueryBuilder::new(
            "SELECT invoice_id, sku, description, category, qty, created_at \
             FROM invoice_lines WHERE invoice_id = ANY(",
        );
        qb.push_bind(chunk.to_vec()).push(")");
        push_line_category_filter(&mut qb, filter);
        if let Some(sku) = sku {
            qb.push(" AND sku ILIKE ").push_bind(format!("%{}%", sku));
        }
        rows.extend(qb.build_query_as::<LineCadenceRow>().fetch_all(pool).await?);
    }
    Ok(rows)
}

/// 查询带有 ignore 品类明细的发票ID (门店计数时整票剔除)
pub async fn list_ignore_invoice_ids(
    pool: &PgPool,
    invoice_ids: &[i64],
) -> Result<Vec<i64>, sqlx::Error> {
    let mut ids = Vec::new();
    for chunk in invoice_ids.chunks(INVOICE_ID_BATCH_SIZE) {
        let chunk_ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT DISTINCT invoice_id
            FROM invoice_lines
            WHERE invoice_id = ANY($1)
              AND category ILIKE '%ignore%'
            "#,
        )
        .bind(chunk)
        .fetch_all(pool)
        .await?;
        ids.extend(chunk_ids);
    }
    Ok(ids)
}

/// 查询全部门店 (去重排序, 空值剔除)
pub async fn list_distinct_locations(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        r#"
        SELECT DISTINCT location
        FROM invoices
        WHERE location IS NOT NULL AND location <> ''
        ORDER BY location
        "#,
    )
    .fetch_all(pool)
    .await
}

/// 查询全部品类 (去重排序, ignore 剔除)
pub async fn list_distinct_categories(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        r#"
        SELECT DISTINCT category
        FROM invoice_lines
        WHERE category NOT ILIKE '%ignore%'
        ORDER BY category
        "#,
    )
    .fetch_all(pool)
    .await
}

/// 查询 SKU 目录 (每个SKU取最早一行的描述/品类, 空值给默认文案)
pub async fn list_sku_catalog(pool: &PgPool) -> Result<Vec<SkuCatalogEntry>, sqlx::Error> {
    sqlx::query_as::<_, SkuCatalogEntry>(
        r#"
        SELECT DISTINCT ON (sku)
               sku,
               COALESCE(description, 'No description') AS description,
               COALESCE(category, 'Other') AS category
        FROM invoice_lines
        WHERE category NOT ILIKE '%ignore%'
        ORDER BY sku, id
        "#,
    )
    .fetch_all(pool)
    .await
}

/// 导出明细行到 CSV (带表头)
pub fn export_to_csv<W: std::io::Write>(
    rows: &[InvoiceExportRow],
    writer: W,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use csv::Writer;

    let mut writer = Writer::from_writer(writer);

    writer.write_record([
        "invoice_id",
        "invoice_date",
        "source",
        "location",
        "status",
        "description",
        "category",
        "line_total",
        "invoice_total",
    ])?;

    for row in rows {
        writer.write_record(&[
            row.invoice_id.to_string(),
            row.invoice_date.to_string(),
            row.source.clone(),
            row.location.clone(),
            row.status.clone().unwrap_or_default(),
            row.description.clone().unwrap_or_default(),
            row.category.clone(),
            row.line_total.to_string(),
            row.invoice_total.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
