//! Entity schemas: per-entity field maps for the external data service.
//!
//! Each [`EntitySchema`] tells the translator and the engine which model to
//! query, which field carries the business date and the amount, how group-by
//! aliases map to fields, which lifecycle states exist and which status
//! vocabulary maps to which predicates.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::filter::{normalize_text, Operator, Predicate};
use crate::value::Value;

/// Whether a date field stores dates or timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateKind {
    /// Calendar dates.
    Date,
    /// Timestamps.
    DateTime,
}

/// A lifecycle state value and its display label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleState {
    /// Stored value, e.g. `sale`.
    pub value: String,
    /// Display label, e.g. `Sales Order`.
    pub label: String,
}

/// Maps status vocabulary to predicates.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRule {
    /// Normalized phrases that trigger this rule.
    pub keywords: Vec<String>,
    /// Predicates emitted when the rule matches.
    pub predicates: Vec<Predicate>,
    /// Field that must lie strictly before the request's current day.
    pub before_today: Option<String>,
}

impl StatusRule {
    fn new(keywords: &[&str], predicates: Vec<Predicate>) -> Self {
        Self {
            keywords: keywords.iter().map(|k| normalize_text(k)).collect(),
            predicates,
            before_today: None,
        }
    }

    fn due_before_today(mut self, field: &str) -> Self {
        self.before_today = Some(field.to_string());
        self
    }
}

/// Field map for one entity of the data service.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    /// Canonical entity name, e.g. `orders`.
    pub name: String,
    /// Display label, e.g. `Sales Orders`.
    pub label: String,
    /// Model on the data service, e.g. `sale.order`.
    pub model: String,
    /// Normalized names accepted for this entity.
    pub aliases: Vec<String>,
    /// Business date field.
    pub date_field: String,
    /// How `date_field` is stored.
    pub date_kind: DateKind,
    /// Field summed by `aggregate`, if the entity has a monetary metric.
    pub amount_field: Option<String>,
    /// Field holding the record's display name.
    pub name_field: String,
    /// Fields returned by `search`.
    pub search_fields: Vec<String>,
    /// Group-by alias → field.
    pub group_aliases: HashMap<String, String>,
    /// Lifecycle state field, if any.
    pub state_field: Option<String>,
    /// Known lifecycle states with display labels.
    pub states: Vec<LifecycleState>,
    /// Status vocabulary mapped to predicates.
    pub status_rules: Vec<StatusRule>,
    /// Predicates always applied (e.g. restricting `account.move` to customer invoices).
    pub base_domain: Vec<Predicate>,
    /// Status keyword suggested when an aggregation mixes lifecycle states.
    pub recommended_status: Option<String>,
}

impl EntitySchema {
    /// A schema for a raw model name with no curated field map.
    #[must_use]
    pub fn generic(model: &str) -> Self {
        Self {
            name: model.to_string(),
            label: model.to_string(),
            model: model.to_string(),
            aliases: vec![model.to_string()],
            date_field: "create_date".to_string(),
            date_kind: DateKind::DateTime,
            amount_field: None,
            name_field: "display_name".to_string(),
            search_fields: vec!["display_name".to_string(), "create_date".to_string()],
            group_aliases: HashMap::new(),
            state_field: None,
            states: Vec::new(),
            status_rules: Vec::new(),
            base_domain: Vec::new(),
            recommended_status: None,
        }
    }

    /// Resolves a group-by alias to a field specification.
    ///
    /// `month`/`year`/`day` (and Spanish equivalents) group the date field by
    /// that granularity; unknown aliases are passed through as field names.
    #[must_use]
    pub fn resolve_group_field(&self, alias: &str) -> String {
        let key = normalize_text(alias);
        if let Some(field) = self.group_aliases.get(&key) {
            return field.clone();
        }
        let granularity = match key.as_str() {
            "day" | "dia" | "daily" => Some("day"),
            "week" | "semana" | "weekly" => Some("week"),
            "month" | "mes" | "monthly" | "mensual" => Some("month"),
            "quarter" | "trimestre" => Some("quarter"),
            "year" | "ano" | "yearly" | "anual" => Some("year"),
            _ => None,
        };
        match granularity {
            Some(g) => format!("{}:{g}", self.date_field),
            None => alias.trim().to_string(),
        }
    }

    /// True if the entity has more than one meaningful lifecycle state.
    #[must_use]
    pub fn has_lifecycle(&self) -> bool {
        self.state_field.is_some() && self.states.len() > 1
    }

    /// Display label for a stored state value.
    #[must_use]
    pub fn state_label(&self, value: &str) -> String {
        self.states
            .iter()
            .find(|s| s.value == value)
            .map_or_else(|| value.to_string(), |s| s.label.clone())
    }

    /// True if `field` is the state field or one a status rule constrains.
    #[must_use]
    pub fn is_status_field(&self, field: &str) -> bool {
        self.state_field.as_deref() == Some(field)
            || self
                .status_rules
                .iter()
                .flat_map(|r| r.predicates.iter())
                .any(|p| p.field == field)
    }

    /// The predicates the recommended status keyword would add.
    #[must_use]
    pub fn recommended_predicates(&self) -> Vec<Predicate> {
        let Some(keyword) = self.recommended_status.as_deref() else {
            return Vec::new();
        };
        let keyword = normalize_text(keyword);
        self.status_rules
            .iter()
            .find(|r| r.keywords.contains(&keyword))
            .map(|r| r.predicates.clone())
            .unwrap_or_default()
    }
}

struct SchemaBuilder {
    schema: EntitySchema,
}

impl SchemaBuilder {
    fn new(name: &str, label: &str, model: &str) -> Self {
        let mut schema = EntitySchema::generic(model);
        schema.name = name.to_string();
        schema.label = label.to_string();
        schema.aliases = vec![normalize_text(name), normalize_text(model), normalize_text(label)];
        schema.name_field = "name".to_string();
        Self { schema }
    }

    fn aliases(mut self, aliases: &[&str]) -> Self {
        self.schema.aliases.extend(aliases.iter().map(|a| normalize_text(a)));
        self
    }

    fn date(mut self, field: &str, kind: DateKind) -> Self {
        self.schema.date_field = field.to_string();
        self.schema.date_kind = kind;
        self
    }

    fn amount(mut self, field: &str) -> Self {
        self.schema.amount_field = Some(field.to_string());
        self
    }

    fn search_fields(mut self, fields: &[&str]) -> Self {
        self.schema.search_fields = fields.iter().map(ToString::to_string).collect();
        self
    }

    fn group(mut self, aliases: &[&str], field: &str) -> Self {
        for alias in aliases {
            self.schema
                .group_aliases
                .insert(normalize_text(alias), field.to_string());
        }
        self
    }

    fn states(mut self, field: &str, states: &[(&str, &str)]) -> Self {
        self.schema.state_field = Some(field.to_string());
        self.schema.states = states
            .iter()
            .map(|(value, label)| LifecycleState {
                value: (*value).to_string(),
                label: (*label).to_string(),
            })
            .collect();
        self.group(&["state", "status", "estado", "stage"], field)
    }

    fn status(mut self, rule: StatusRule) -> Self {
        self.schema.status_rules.push(rule);
        self
    }

    fn base(mut self, predicate: Predicate) -> Self {
        self.schema.base_domain.push(predicate);
        self
    }

    fn recommend(mut self, keyword: &str) -> Self {
        self.schema.recommended_status = Some(keyword.to_string());
        self
    }

    fn build(self) -> EntitySchema {
        let mut schema = self.schema;
        schema.aliases.sort();
        schema.aliases.dedup();
        schema
    }
}

fn eq(field: &str, value: impl Into<Value>) -> Predicate {
    Predicate::new(field, Operator::Eq, value)
}

fn one_of(field: &str, values: &[&str]) -> Predicate {
    Predicate::new(field, Operator::In, Value::list(values.iter().copied()))
}

const UNPAID: &[&str] = &["not_paid", "partial"];

fn sales_orders() -> EntitySchema {
    SchemaBuilder::new("orders", "Sales Orders", "sale.order")
        .aliases(&[
            "order",
            "sales",
            "sale",
            "sale orders",
            "pedidos",
            "pedido",
            "ventas",
            "ordenes de venta",
        ])
        .date("date_order", DateKind::DateTime)
        .amount("amount_total")
        .search_fields(&["name", "partner_id", "date_order", "amount_total", "state", "user_id"])
        .group(&["customer", "customers", "client", "partner", "cliente", "clientes"], "partner_id")
        .group(&["salesperson", "seller", "user", "vendedor"], "user_id")
        .group(&["team", "sales team", "equipo"], "team_id")
        .states(
            "state",
            &[
                ("draft", "Quotation"),
                ("sent", "Quotation Sent"),
                ("sale", "Sales Order"),
                ("done", "Locked"),
                ("cancel", "Cancelled"),
            ],
        )
        .status(StatusRule::new(
            &["confirmed", "confirmado", "confirmados", "confirmada", "confirmadas"],
            vec![one_of("state", &["sale", "done"])],
        ))
        .status(StatusRule::new(
            &[
                "pending",
                "quotation",
                "quotations",
                "pendiente",
                "pendientes",
                "cotizacion",
                "cotizaciones",
                "draft",
            ],
            vec![one_of("state", &["draft", "sent"])],
        ))
        .status(StatusRule::new(
            &["cancelled", "canceled", "cancelado", "cancelados"],
            vec![eq("state", "cancel")],
        ))
        .status(StatusRule::new(
            &["to invoice", "por facturar"],
            vec![eq("invoice_status", "to invoice")],
        ))
        .recommend("confirmed")
        .build()
}

fn invoice_like(
    name: &str,
    label: &str,
    move_type: &str,
    aliases: &[&str],
    due_keywords: &[&str],
) -> EntitySchema {
    SchemaBuilder::new(name, label, "account.move")
        .aliases(aliases)
        .date("invoice_date", DateKind::Date)
        .amount("amount_total")
        .search_fields(&[
            "name",
            "partner_id",
            "invoice_date",
            "invoice_date_due",
            "amount_total",
            "amount_residual",
            "state",
            "payment_state",
        ])
        .group(
            &["customer", "customers", "vendor", "supplier", "partner", "cliente", "proveedor"],
            "partner_id",
        )
        .group(&["salesperson", "vendedor"], "invoice_user_id")
        .group(&["payment", "payment state", "pago"], "payment_state")
        .base(eq("move_type", move_type))
        .states("state", &[("draft", "Draft"), ("posted", "Posted"), ("cancel", "Cancelled")])
        .status(StatusRule::new(
            &["posted", "confirmed", "validated", "publicada", "publicadas", "confirmada", "confirmadas"],
            vec![eq("state", "posted")],
        ))
        .status(StatusRule::new(&["draft", "borrador", "borradores"], vec![eq("state", "draft")]))
        .status(StatusRule::new(
            &["pending", "unpaid", "open", "pendiente", "pendientes", "impaga", "impagas"],
            vec![eq("state", "posted"), one_of("payment_state", UNPAID)],
        ))
        .status(StatusRule::new(
            &["paid", "pagada", "pagadas"],
            vec![one_of("payment_state", &["paid", "in_payment"])],
        ))
        .status(
            StatusRule::new(
                &["overdue", "past due", "late", "vencida", "vencidas", "atrasada", "atrasadas"],
                vec![eq("state", "posted"), one_of("payment_state", UNPAID)],
            )
            .due_before_today("invoice_date_due"),
        )
        .status(StatusRule::new(
            due_keywords,
            vec![eq("state", "posted"), one_of("payment_state", UNPAID)],
        ))
        .status(StatusRule::new(
            &["cancelled", "canceled", "cancelada", "canceladas"],
            vec![eq("state", "cancel")],
        ))
        .recommend("posted")
        .build()
}

fn purchases() -> EntitySchema {
    SchemaBuilder::new("purchases", "Purchase Orders", "purchase.order")
        .aliases(&["purchase", "purchase orders", "compras", "compra", "ordenes de compra"])
        .date("date_order", DateKind::DateTime)
        .amount("amount_total")
        .search_fields(&["name", "partner_id", "date_order", "amount_total", "state"])
        .group(&["vendor", "supplier", "partner", "proveedor", "proveedores"], "partner_id")
        .group(&["buyer", "user", "comprador"], "user_id")
        .states(
            "state",
            &[
                ("draft", "RFQ"),
                ("sent", "RFQ Sent"),
                ("to approve", "To Approve"),
                ("purchase", "Purchase Order"),
                ("done", "Locked"),
                ("cancel", "Cancelled"),
            ],
        )
        .status(StatusRule::new(
            &["confirmed", "confirmado", "confirmados", "confirmada", "confirmadas"],
            vec![one_of("state", &["purchase", "done"])],
        ))
        .status(StatusRule::new(
            &["pending", "rfq", "pendiente", "pendientes", "draft"],
            vec![one_of("state", &["draft", "sent", "to approve"])],
        ))
        .status(StatusRule::new(
            &["cancelled", "canceled", "cancelada", "canceladas"],
            vec![eq("state", "cancel")],
        ))
        .recommend("confirmed")
        .build()
}

fn partners() -> EntitySchema {
    SchemaBuilder::new("partners", "Contacts", "res.partner")
        .aliases(&[
            "partner", "contacts", "contact", "contactos", "customers", "clientes", "suppliers", "vendors",
            "proveedores",
        ])
        .date("create_date", DateKind::DateTime)
        .search_fields(&["name", "email", "phone", "city", "country_id", "customer_rank", "supplier_rank"])
        .group(&["country", "pais"], "country_id")
        .group(&["city", "ciudad"], "city")
        .group(&["salesperson", "vendedor"], "user_id")
        .status(StatusRule::new(
            &["customer", "customers", "client", "clients", "cliente", "clientes"],
            vec![Predicate::new("customer_rank", Operator::Gt, 0_i64)],
        ))
        .status(StatusRule::new(
            &["supplier", "suppliers", "vendor", "vendors", "proveedor", "proveedores"],
            vec![Predicate::new("supplier_rank", Operator::Gt, 0_i64)],
        ))
        .status(StatusRule::new(
            &["company", "companies", "empresa", "empresas"],
            vec![eq("is_company", true)],
        ))
        .build()
}

fn products() -> EntitySchema {
    SchemaBuilder::new("products", "Products", "product.product")
        .aliases(&["product", "items", "productos", "producto", "articulos"])
        .date("create_date", DateKind::DateTime)
        .search_fields(&["name", "default_code", "list_price", "standard_price", "categ_id", "qty_available"])
        .group(&["category", "categoria"], "categ_id")
        .status(StatusRule::new(
            &["service", "services", "servicio", "servicios"],
            vec![eq("type", "service")],
        ))
        .status(StatusRule::new(&["consumable", "consumables", "consumible"], vec![eq("type", "consu")]))
        .build()
}

fn stock() -> EntitySchema {
    SchemaBuilder::new("stock", "Stock", "stock.quant")
        .aliases(&["inventory", "inventario", "existencias", "quants", "stock levels"])
        .date("in_date", DateKind::DateTime)
        .amount("quantity")
        .search_fields(&["product_id", "location_id", "quantity", "reserved_quantity", "in_date"])
        .group(&["product", "producto", "item"], "product_id")
        .group(&["location", "warehouse", "almacen", "ubicacion"], "location_id")
        .base(eq("location_id.usage", "internal"))
        .status(StatusRule::new(
            &["available", "in stock", "disponible", "disponibles"],
            vec![Predicate::new("quantity", Operator::Gt, 0.0)],
        ))
        .status(StatusRule::new(
            &["negative", "negativo", "negativos"],
            vec![Predicate::new("quantity", Operator::Lt, 0.0)],
        ))
        .build()
}

/// Registry of entity schemas, resolved by normalized name or alias.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    schemas: Vec<Arc<EntitySchema>>,
}

impl EntityRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the Odoo-style business entities.
    #[must_use]
    pub fn odoo() -> Self {
        let mut registry = Self::new();
        registry.register(sales_orders());
        registry.register(invoice_like(
            "invoices",
            "Customer Invoices",
            "out_invoice",
            &["invoice", "customer invoices", "facturas", "factura", "facturas de cliente", "account.move"],
            &["receivable", "receivables", "accounts receivable", "por cobrar", "cuentas por cobrar"],
        ));
        registry.register(invoice_like(
            "bills",
            "Vendor Bills",
            "in_invoice",
            &["bill", "vendor bills", "supplier invoices", "facturas de proveedor", "payables"],
            &["payable", "payables", "accounts payable", "por pagar", "cuentas por pagar"],
        ));
        registry.register(purchases());
        registry.register(partners());
        registry.register(products());
        registry.register(stock());
        registry
    }

    /// Adds (or replaces, by canonical name) a schema.
    pub fn register(&mut self, schema: EntitySchema) {
        self.schemas.retain(|s| s.name != schema.name);
        self.schemas.push(Arc::new(schema));
    }

    /// Resolves an entity name, alias or raw model name.
    ///
    /// Names containing a `.` that match no curated schema resolve to a
    /// [`EntitySchema::generic`] schema for that model.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<EntitySchema>> {
        let key = normalize_text(name);
        if key.is_empty() {
            return None;
        }
        if let Some(schema) = self.schemas.iter().find(|s| s.name == key) {
            return Some(Arc::clone(schema));
        }
        if let Some(schema) = self.schemas.iter().find(|s| s.aliases.contains(&key)) {
            return Some(Arc::clone(schema));
        }
        if key.contains('.') && !key.contains(' ') {
            return Some(Arc::new(EntitySchema::generic(&key)));
        }
        None
    }

    /// All registered schemas.
    pub fn schemas(&self) -> impl Iterator<Item = &EntitySchema> {
        self.schemas.iter().map(AsRef::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_by_alias_and_model() {
        let registry = EntityRegistry::odoo();
        assert_eq!(registry.resolve("orders").unwrap().model, "sale.order");
        assert_eq!(registry.resolve("  Ventas ").unwrap().name, "orders");
        assert_eq!(registry.resolve("sale.order").unwrap().name, "orders");
        assert_eq!(registry.resolve("Facturas").unwrap().name, "invoices");
        assert_eq!(registry.resolve("compras").unwrap().name, "purchases");
    }

    #[test]
    fn test_resolve_unknown_dotted_model_is_generic() {
        let registry = EntityRegistry::odoo();
        let schema = registry.resolve("crm.lead").unwrap();
        assert_eq!(schema.model, "crm.lead");
        assert_eq!(schema.date_field, "create_date");
        assert!(schema.amount_field.is_none());
        assert!(!schema.has_lifecycle());
    }

    #[test]
    fn test_resolve_unknown_plain_name_fails() {
        let registry = EntityRegistry::odoo();
        assert!(registry.resolve("spaceships").is_none());
        assert!(registry.resolve("   ").is_none());
    }

    #[test]
    fn test_group_alias_resolution() {
        let registry = EntityRegistry::odoo();
        let orders = registry.resolve("orders").unwrap();
        assert_eq!(orders.resolve_group_field("Customer"), "partner_id");
        assert_eq!(orders.resolve_group_field("month"), "date_order:month");
        assert_eq!(orders.resolve_group_field("state"), "state");
        assert_eq!(orders.resolve_group_field("team_id"), "team_id");
    }

    #[test]
    fn test_lifecycle_and_labels() {
        let registry = EntityRegistry::odoo();
        let orders = registry.resolve("orders").unwrap();
        assert!(orders.has_lifecycle());
        assert_eq!(orders.state_label("sale"), "Sales Order");
        assert_eq!(orders.state_label("weird"), "weird");
        assert!(orders.is_status_field("state"));
        assert!(orders.is_status_field("invoice_status"));
        assert!(!orders.is_status_field("partner_id"));

        let partners = registry.resolve("partners").unwrap();
        assert!(!partners.has_lifecycle());
    }

    #[test]
    fn test_recommended_predicates() {
        let registry = EntityRegistry::odoo();
        let invoices = registry.resolve("invoices").unwrap();
        let preds = invoices.recommended_predicates();
        assert_eq!(preds, vec![eq("state", "posted")]);
    }

    #[test]
    fn test_register_replaces_by_name() {
        let mut registry = EntityRegistry::odoo();
        let before = registry.schemas().count();
        let mut custom = EntitySchema::generic("x.orders");
        custom.name = "orders".to_string();
        registry.register(custom);
        assert_eq!(registry.schemas().count(), before);
        assert_eq!(registry.resolve("orders").unwrap().model, "x.orders");
    }
}
