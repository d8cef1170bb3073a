//! Warehouse stock and retail sale database operations.

use rusqlite::{params, Connection, OptionalExtension};

use super::{Database, DbError, DbResult};
use crate::models::{RetailMatchCandidate, RetailSale, SaleStatus, StockItem};

impl Database {
    /// Insert or update a stock row; `total` is recomputed.
    pub fn upsert_stock_item(&self, item: &StockItem) -> DbResult<()> {
        if item.quantity < 0.0 {
            return Err(DbError::Constraint(format!(
                "negative quantity for {}",
                item.name
            )));
        }
        self.conn.execute(
            r#"
            INSERT INTO stock_items (name, unit, quantity, price, total, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
            ON CONFLICT(name) DO UPDATE SET
                unit = excluded.unit,
                quantity = excluded.quantity,
                price = excluded.price,
                total = excluded.total,
                updated_at = datetime('now')
            "#,
            params![item.name, item.unit, item.quantity, item.price, item.total()],
        )?;
        Ok(())
    }

    /// Get a stock row by exact name.
    pub fn get_stock_item(&self, name: &str) -> DbResult<Option<StockItem>> {
        get_stock_item(&self.conn, name)
    }

    /// All stock rows, ordered by name.
    pub fn list_stock_items(&self) -> DbResult<Vec<StockItem>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, unit, quantity, price FROM stock_items ORDER BY name")?;
        let rows = stmt.query_map([], stock_item_from_row)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Store a newly logged sale.
    pub fn insert_retail_sale(&self, sale: &RetailSale) -> DbResult<()> {
        let candidates_json = sale
            .candidates
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn.execute(
            r#"
            INSERT INTO retail_sales (
                id, text, created_at, status, matched_product, match_score, candidates
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                sale.id,
                sale.text,
                sale.created_at,
                sale.status.as_str(),
                sale.matched_product,
                sale.match_score,
                candidates_json,
            ],
        )?;
        Ok(())
    }

    /// Persist the match fields of a sale. Applied sales are never touched.
    pub fn update_retail_match(&self, sale: &RetailSale) -> DbResult<bool> {
        let candidates_json = sale
            .candidates
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let rows_affected = self.conn.execute(
            r#"
            UPDATE retail_sales
            SET status = ?2, matched_product = ?3, match_score = ?4, candidates = ?5
            WHERE id = ?1 AND status != 'applied'
            "#,
            params![
                sale.id,
                sale.status.as_str(),
                sale.matched_product,
                sale.match_score,
                candidates_json,
            ],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get a sale by id.
    pub fn get_retail_sale(&self, id: &str) -> DbResult<Option<RetailSale>> {
        get_retail_sale(&self.conn, id)
    }

    /// All sales, newest first.
    pub fn list_retail_sales(&self) -> DbResult<Vec<RetailSale>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, text, created_at, status, matched_product, match_score, candidates
            FROM retail_sales
            ORDER BY created_at DESC, id
            "#,
        )?;
        let rows = stmt.query_map([], sale_row_from_row)?;

        let mut sales = Vec::new();
        for row in rows {
            sales.push(row?.try_into()?);
        }
        Ok(sales)
    }

    /// Deduct one unit of `product` and mark the sale applied, atomically.
    ///
    /// Quantity is floored at zero and the row total recomputed.
    pub fn apply_retail_sale(&mut self, sale_id: &str, product: &str) -> DbResult<(RetailSale, StockItem)> {
        let tx = self.conn.transaction()?;

        let mut sale = get_retail_sale(&tx, sale_id)?
            .ok_or_else(|| DbError::NotFound(format!("retail sale {}", sale_id)))?;
        if sale.is_applied() {
            return Err(DbError::Constraint(format!("sale {} already applied", sale_id)));
        }

        let mut item = get_stock_item(&tx, product)?
            .ok_or_else(|| DbError::NotFound(format!("stock item {}", product)))?;
        item.quantity = (item.quantity - 1.0).max(0.0);

        tx.execute(
            r#"
            UPDATE stock_items
            SET quantity = ?2, total = ?3, updated_at = datetime('now')
            WHERE name = ?1
            "#,
            params![item.name, item.quantity, item.total()],
        )?;
        tx.execute(
            "UPDATE retail_sales SET status = 'applied', matched_product = ?2 WHERE id = ?1",
            params![sale_id, item.name],
        )?;

        tx.commit()?;

        sale.status = SaleStatus::Applied;
        sale.matched_product = Some(item.name.clone());
        Ok((sale, item))
    }
}

fn get_stock_item(conn: &Connection, name: &str) -> DbResult<Option<StockItem>> {
    Ok(conn
        .query_row(
            "SELECT name, unit, quantity, price FROM stock_items WHERE name = ?",
            [name],
            stock_item_from_row,
        )
        .optional()?)
}

fn get_retail_sale(conn: &Connection, id: &str) -> DbResult<Option<RetailSale>> {
    let row = conn
        .query_row(
            r#"
            SELECT id, text, created_at, status, matched_product, match_score, candidates
            FROM retail_sales
            WHERE id = ?
            "#,
            [id],
            sale_row_from_row,
        )
        .optional()?;

    row.map(|r| r.try_into()).transpose()
}

fn stock_item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StockItem> {
    Ok(StockItem {
        name: row.get(0)?,
        unit: row.get(1)?,
        quantity: row.get(2)?,
        price: row.get(3)?,
    })
}

fn sale_row_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RetailSaleRow> {
    Ok(RetailSaleRow {
        id: row.get(0)?,
        text: row.get(1)?,
        created_at: row.get(2)?,
        status: row.get(3)?,
        matched_product: row.get(4)?,
        match_score: row.get(5)?,
        candidates: row.get(6)?,
    })
}

/// Intermediate row struct for database mapping.
struct RetailSaleRow {
    id: String,
    text: String,
    created_at: String,
    status: String,
    matched_product: Option<String>,
    match_score: Option<f64>,
    candidates: Option<String>,
}

impl TryFrom<RetailSaleRow> for RetailSale {
    type Error = DbError;

    fn try_from(row: RetailSaleRow) -> Result<Self, Self::Error> {
        let status = SaleStatus::parse(&row.status)
            .ok_or_else(|| DbError::Constraint(format!("unknown sale status: {}", row.status)))?;
        let candidates: Option<Vec<RetailMatchCandidate>> = row
            .candidates
            .map(|s| serde_json::from_str(&s))
            .transpose()?;

        Ok(RetailSale {
            id: row.id,
            text: row.text,
            created_at: row.created_at,
            status,
            matched_product: row.matched_product,
            match_score: row.match_score,
            candidates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.upsert_stock_item(&StockItem::new("Краска Алина", 3.0, 3200.0))
            .unwrap();
        db
    }

    #[test]
    fn test_stock_upsert_and_list() {
        let db = setup_db();
        let mut item = StockItem::new("Дрель Bosch", 1.0, 5000.0);
        db.upsert_stock_item(&item).unwrap();
        item.quantity = 4.0;
        db.upsert_stock_item(&item).unwrap();

        let items = db.list_stock_items().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(db.get_stock_item("Дрель Bosch").unwrap().unwrap().quantity, 4.0);
    }

    #[test]
    fn test_negative_quantity_rejected() {
        let db = setup_db();
        let item = StockItem::new("Лак", -1.0, 10.0);
        assert!(matches!(
            db.upsert_stock_item(&item),
            Err(DbError::Constraint(_))
        ));
    }

    #[test]
    fn test_sale_round_trip_with_candidates() {
        let db = setup_db();
        let mut sale = RetailSale::new("Краска Алина 3200");
        db.insert_retail_sale(&sale).unwrap();

        sale.status = SaleStatus::Matched;
        sale.matched_product = Some("Краска Алина".into());
        sale.match_score = Some(0.93);
        sale.candidates = Some(vec![RetailMatchCandidate {
            product: "Краска Алина".into(),
            score: 0.93,
        }]);
        assert!(db.update_retail_match(&sale).unwrap());

        let loaded = db.get_retail_sale(&sale.id).unwrap().unwrap();
        assert_eq!(loaded, sale);
    }

    #[test]
    fn test_apply_deducts_and_marks_applied() {
        let mut db = setup_db();
        let sale = RetailSale::new("Краска Алина 3200");
        db.insert_retail_sale(&sale).unwrap();

        let (applied, item) = db.apply_retail_sale(&sale.id, "Краска Алина").unwrap();
        assert_eq!(applied.status, SaleStatus::Applied);
        assert_eq!(item.quantity, 2.0);

        let total: f64 = db
            .conn()
            .query_row(
                "SELECT total FROM stock_items WHERE name = 'Краска Алина'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(total, 6400.0);
    }

    #[test]
    fn test_apply_twice_is_rejected() {
        let mut db = setup_db();
        let sale = RetailSale::new("Краска Алина");
        db.insert_retail_sale(&sale).unwrap();
        db.apply_retail_sale(&sale.id, "Краска Алина").unwrap();

        assert!(matches!(
            db.apply_retail_sale(&sale.id, "Краска Алина"),
            Err(DbError::Constraint(_))
        ));
        assert_eq!(db.get_stock_item("Краска Алина").unwrap().unwrap().quantity, 2.0);
    }

    #[test]
    fn test_apply_unknown_product_leaves_sale_pending() {
        let mut db = setup_db();
        let sale = RetailSale::new("Неизвестный товар");
        db.insert_retail_sale(&sale).unwrap();

        assert!(matches!(
            db.apply_retail_sale(&sale.id, "Нет такого"),
            Err(DbError::NotFound(_))
        ));
        let loaded = db.get_retail_sale(&sale.id).unwrap().unwrap();
        assert_eq!(loaded.status, SaleStatus::Pending);
    }

    #[test]
    fn test_quantity_floors_at_zero() {
        let mut db = Database::open_in_memory().unwrap();
        db.upsert_stock_item(&StockItem::new("Лак", 0.0, 100.0)).unwrap();
        let sale = RetailSale::new("Лак");
        db.insert_retail_sale(&sale).unwrap();

        let (_, item) = db.apply_retail_sale(&sale.id, "Лак").unwrap();
        assert_eq!(item.quantity, 0.0);
    }

    #[test]
    fn test_applied_sale_not_updated() {
        let mut db = setup_db();
        let mut sale = RetailSale::new("Краска Алина");
        db.insert_retail_sale(&sale).unwrap();
        db.apply_retail_sale(&sale.id, "Краска Алина").unwrap();

        sale.status = SaleStatus::Matched;
        assert!(!db.update_retail_match(&sale).unwrap());
    }
}
