//! A small product catalog used to exercise the engine from the command line.

use std::sync::Arc;

use engine::Collaborators;
use memstore::{MemoryStore, ScriptedEngine, TemplateSet};
use model::{ActionError, ExecutionContext, ObjectGraph, ObjectRef, Value};
use serde_json::json;

const PRODUCTS: [(&str, &str, f64); 3] = [
    ("1", "Walnut desk", 420.0),
    ("2", "Oak shelf", 180.0),
    ("3", "Linen lamp", 65.5),
];

pub fn catalog() -> anyhow::Result<Collaborators> {
    let store = MemoryStore::new("Root");
    let root = store.root();
    let catalog = store.add_object(&root, "catalog", "Catalog")?;
    let products = store.add_object(&catalog, "products", "Products")?;
    for (id, name, price) in PRODUCTS {
        let product = store.add_object(&products, id, "Product")?;
        store.set_prop(&product, "name", json!(name))?;
        store.set_prop(&product, "price", json!(price))?;
    }

    let scripting = ScriptedEngine::new(Arc::new(store.clone()));
    define_actions(&scripting);

    let skins = TemplateSet::new();
    skins.add(
        "Root",
        "layout",
        "<html><body><h1>{{title}}</h1>{{body}}</body></html>",
    );
    skins.add(
        "Catalog",
        "list",
        "<ul><li>1</li><li>2</li><li>3</li></ul><p>{{q}}</p>",
    );
    skins.add("Product", "card", "<div class=\"card\">{{name}} {{price}}</div>");

    Ok(Collaborators {
        graph: Arc::new(store.clone()),
        store: Arc::new(store),
        scripting: Arc::new(scripting),
        skins: Arc::new(skins),
    })
}

fn product_field(
    ctx: &mut ExecutionContext<'_>,
    this: &ObjectRef,
    key: &str,
) -> Result<Value, ActionError> {
    Ok(ctx.tx.get(this, key)?.unwrap_or(Value::Null))
}

fn define_actions(scripting: &ScriptedEngine) {
    scripting.define("Root", "main_action", |ctx, _, _| {
        let message = ctx.res.message().unwrap_or_default().to_string();
        ctx.res.write("<h1>Catalog</h1>");
        if !message.is_empty() {
            ctx.res.write("<p class=\"message\">");
            ctx.res.encode(&message);
            ctx.res.write("</p>");
        }
        ctx.res.write("<a href=\"/catalog/list.html\">Browse</a>");
        Ok(Value::Null)
    });

    scripting.define("Root", "notfound_action", |ctx, _, _| {
        ctx.res.write("<h1>Not found</h1><p>");
        ctx.res.encode(&ctx.request.path);
        ctx.res.write("</p>");
        Ok(Value::Null)
    });

    scripting.define("Root", "error_action", |ctx, _, _| {
        let error = ctx.res.error().unwrap_or("unknown error").to_string();
        ctx.res.set_status(500);
        ctx.res.write("<h1>Something went wrong</h1><pre>");
        ctx.res.encode(&error);
        ctx.res.write("</pre>");
        Ok(Value::Null)
    });

    scripting.define("Product", "main_action", |ctx, this, _| {
        let Some(this) = this else {
            return Ok(Value::Null);
        };
        let views = product_field(ctx, this, "views")?.as_i64().unwrap_or(0) + 1;
        ctx.tx.set(this, "views", json!(views))?;

        let mut params = serde_json::Map::new();
        params.insert("name".into(), product_field(ctx, this, "name")?);
        params.insert("price".into(), product_field(ctx, this, "price")?);
        ctx.render_skin(this, "card", &params)?;
        ctx.res.write(&format!("<p>{} views</p>", views));
        Ok(Value::Null)
    });

    scripting.define("Product", "rename_action", |ctx, this, _| {
        let (Some(this), Some(name)) = (this, ctx.param("name").map(str::to_string)) else {
            return Err(model::ScriptError::new("rename needs a name parameter").into());
        };
        ctx.tx.set(this, "name", json!(name))?;
        ctx.res.set_message(Some(format!("Renamed to {}", name)));
        Err(ctx.res.redirect(&format!("/catalog/products/{}", this.id())).into())
    });

    scripting.define("Products", "count", |_, _, _| Ok(json!(PRODUCTS.len())));

    scripting.define("Product", "price", |ctx, this, _| match this {
        Some(this) => product_field(ctx, this, "price"),
        None => Ok(Value::Null),
    });

    scripting.define_global("greet", |ctx, _, args| {
        let name = match (args.first(), ctx.request.principal_id()) {
            (Some(Value::String(name)), _) => name.clone(),
            (_, Some(id)) => id.to_string(),
            _ => "stranger".to_string(),
        };
        Ok(json!(format!("hello, {}", name)))
    });
}
