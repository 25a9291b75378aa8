//! PostgreSQL adapter integration tests using testcontainers.
//!
//! Run with: cargo test -p api --test storage_postgres --features postgres-tests
//!
//! Each test starts its own PostgreSQL container, runs the migrations and
//! drives `DbAdapter` through the persistence ports.

use std::sync::Arc;
use std::time::Duration;

use api_lib::adapters::DbAdapter;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use storefront_core::domain::{
    CartOwner, CheckoutOrder, NewProduct, NewUser, Product, ProductUpdate, Role, User, UserUpdate,
};
use storefront_core::ports::{AccountStore, CartStore, CatalogStore, PortError, PurchaseStore};
use storefront_core::CheckoutEngine;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use testresult::TestResult;
use uuid::Uuid;

struct Postgres {
    _container: ContainerAsync<GenericImage>,
    pool: PgPool,
    store: Arc<DbAdapter>,
}

/// Starts PostgreSQL, connects a small pool and runs the migrations.
async fn start_postgres() -> TestResult<Postgres> {
    // PostgreSQL logs the ready message once during init and once when it is
    // actually listening, hence the short sleep after the wait.
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stdout(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_USER", "storefront")
        .with_env_var("POSTGRES_PASSWORD", "storefront")
        .with_env_var("POSTGRES_DB", "storefront")
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await?;

    tokio::time::sleep(Duration::from_secs(1)).await;

    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let url = format!("postgres://storefront:storefront@{}:{}/storefront", host, port);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&url)
        .await?;
    let store = Arc::new(DbAdapter::new(pool.clone()));
    store.run_migrations().await?;

    Ok(Postgres {
        _container: container,
        pool,
        store,
    })
}

async fn user(store: &DbAdapter, email: &str, role: Role) -> TestResult<User> {
    Ok(store
        .create_user(NewUser {
            username: email.to_string(),
            email: email.to_string(),
            hashed_password: "hash".to_string(),
            role,
        })
        .await?)
}

fn new_product(seller: Uuid, name: &str, price: Decimal) -> NewProduct {
    NewProduct {
        seller_id: seller,
        name: name.to_string(),
        description: None,
        price,
        quantity_available: 10,
        category_ids: Vec::new(),
    }
}

async fn product(store: &DbAdapter, seller: Uuid, name: &str, price: Decimal) -> TestResult<Product> {
    Ok(store.create_product(new_product(seller, name, price)).await?)
}

async fn count(pool: &PgPool, sql: &str, id: Uuid) -> TestResult<i64> {
    Ok(sqlx::query_scalar::<_, i64>(sql).bind(id).fetch_one(pool).await?)
}

#[tokio::test]
async fn adding_the_same_product_twice_merges_the_line() -> TestResult {
    let pg = start_postgres().await?;
    let seller = user(&pg.store, "seller@example.com", Role::Seller).await?;
    let book = product(&pg.store, seller.id, "Book", Decimal::new(1000, 2)).await?;
    let cart = pg.store.get_or_create_cart(CartOwner::User(seller.id)).await?;

    let first = pg.store.upsert_item(cart.id, book.id, 2).await?;
    let second = pg.store.upsert_item(cart.id, book.id, 3).await?;

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.item.id, second.item.id);
    let lines = pg.store.get_cart_lines(cart.id).await?;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].quantity, 5);
    Ok(())
}

#[tokio::test]
async fn checkout_totals_the_cart_and_empties_it() -> TestResult {
    let pg = start_postgres().await?;
    let client = user(&pg.store, "client@example.com", Role::Client).await?;
    let seller = user(&pg.store, "seller@example.com", Role::Seller).await?;
    let book = product(&pg.store, seller.id, "Book", Decimal::new(1000, 2)).await?;
    let pen = product(&pg.store, seller.id, "Pen", Decimal::new(500, 2)).await?;
    let cart = pg.store.get_or_create_cart(CartOwner::User(client.id)).await?;
    pg.store.upsert_item(cart.id, book.id, 2).await?;
    pg.store.upsert_item(cart.id, pen.id, 3).await?;

    let engine = CheckoutEngine::new(pg.store.clone(), pg.store.clone());
    let purchase = engine.checkout(client.id).await?;

    assert_eq!(purchase.total, Decimal::new(35, 0));
    assert_eq!(purchase.items.len(), 2);
    assert!(pg.store.get_cart_lines(cart.id).await?.is_empty());
    let stored = pg.store.get_purchase(client.id, purchase.id).await?;
    assert_eq!(stored, purchase);
    Ok(())
}

#[tokio::test]
async fn empty_cart_checkout_creates_no_purchase() -> TestResult {
    let pg = start_postgres().await?;
    let client = user(&pg.store, "client@example.com", Role::Client).await?;
    let engine = CheckoutEngine::new(pg.store.clone(), pg.store.clone());

    // No cart at all, then an existing but empty cart.
    assert!(matches!(engine.checkout(client.id).await, Err(PortError::EmptyCart)));
    pg.store.get_or_create_cart(CartOwner::User(client.id)).await?;
    assert!(matches!(engine.checkout(client.id).await, Err(PortError::EmptyCart)));

    assert!(pg.store.list_purchases(client.id, None).await?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checkouts_create_one_purchase() -> TestResult {
    let pg = start_postgres().await?;
    let client = user(&pg.store, "client@example.com", Role::Client).await?;
    let seller = user(&pg.store, "seller@example.com", Role::Seller).await?;
    let book = product(&pg.store, seller.id, "Book", Decimal::new(1000, 2)).await?;
    let cart = pg.store.get_or_create_cart(CartOwner::User(client.id)).await?;
    pg.store.upsert_item(cart.id, book.id, 1).await?;

    let engine = CheckoutEngine::new(pg.store.clone(), pg.store.clone());
    let client_id = client.id;
    let (first, second) = tokio::join!(
        tokio::spawn({
            let engine = engine.clone();
            async move { engine.checkout(client_id).await }
        }),
        tokio::spawn({
            let engine = engine.clone();
            async move { engine.checkout(client_id).await }
        }),
    );
    let results = [first?, second?];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(PortError::EmptyCart))));
    assert_eq!(pg.store.list_purchases(client.id, None).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn deleted_products_cannot_be_added() -> TestResult {
    let pg = start_postgres().await?;
    let client = user(&pg.store, "client@example.com", Role::Client).await?;
    let seller = user(&pg.store, "seller@example.com", Role::Seller).await?;
    let book = product(&pg.store, seller.id, "Book", Decimal::new(1000, 2)).await?;
    let pen = product(&pg.store, seller.id, "Pen", Decimal::new(500, 2)).await?;
    let cart = pg.store.get_or_create_cart(CartOwner::User(client.id)).await?;
    pg.store.upsert_item(cart.id, pen.id, 1).await?;

    pg.store.delete_product(book.id).await?;
    let result = pg.store.upsert_item(cart.id, book.id, 1).await;
    assert!(matches!(result, Err(PortError::InvalidArgument(_))));

    let engine = CheckoutEngine::new(pg.store.clone(), pg.store.clone());
    let purchase = engine.checkout(client.id).await?;
    assert_eq!(purchase.total, Decimal::new(500, 2));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn adding_while_deleting_never_strands_a_deleted_product() -> TestResult {
    let pg = start_postgres().await?;
    let client = user(&pg.store, "client@example.com", Role::Client).await?;
    let seller = user(&pg.store, "seller@example.com", Role::Seller).await?;
    let cart_id = pg.store.get_or_create_cart(CartOwner::User(client.id)).await?.id;

    for round in 0..20 {
        let doomed = product(&pg.store, seller.id, &format!("Doomed {}", round), Decimal::ONE)
            .await?
            .id;
        let adding = tokio::spawn({
            let store = pg.store.clone();
            async move { store.upsert_item(cart_id, doomed, 1).await }
        });
        let deleting = tokio::spawn({
            let store = pg.store.clone();
            async move { store.delete_product(doomed).await }
        });
        let (added, deleted) = tokio::join!(adding, deleting);
        deleted??;
        match added? {
            Ok(_) | Err(PortError::InvalidArgument(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let stranded = count(
        &pg.pool,
        "SELECT count(*) FROM cart_items ci JOIN products p ON p.id = ci.product_id \
         WHERE ci.cart_id = $1 AND p.deleted_at IS NOT NULL",
        cart_id,
    )
    .await?;
    assert_eq!(stranded, 0);

    // Nothing live is left in the cart, so checkout reports an empty cart
    // rather than a conflict.
    let engine = CheckoutEngine::new(pg.store.clone(), pg.store.clone());
    assert!(matches!(engine.checkout(client.id).await, Err(PortError::EmptyCart)));
    Ok(())
}

#[tokio::test]
async fn out_of_range_money_is_an_invalid_argument() -> TestResult {
    let pg = start_postgres().await?;
    let client = user(&pg.store, "client@example.com", Role::Client).await?;
    let seller = user(&pg.store, "seller@example.com", Role::Seller).await?;

    // The adapter does not validate, so the column bound itself is hit.
    let huge = pg
        .store
        .create_product(new_product(seller.id, "Yacht", Decimal::new(100_000_000_000, 0)))
        .await;
    assert!(matches!(huge, Err(PortError::InvalidArgument(_))));

    let book = product(&pg.store, seller.id, "Book", Decimal::new(1000, 2)).await?;
    let cart = pg.store.get_or_create_cart(CartOwner::User(client.id)).await?;
    pg.store.upsert_item(cart.id, book.id, 1).await?;
    let lines = pg.store.get_cart_lines(cart.id).await?;
    let order = CheckoutOrder {
        total: Decimal::new(1_000_000_000_000, 0),
        ..CheckoutOrder::from_snapshot(cart.id, client.id, lines)?
    };

    let committed = pg.store.commit_checkout(order).await;
    assert!(matches!(committed, Err(PortError::InvalidArgument(_))));
    assert_eq!(pg.store.get_cart_lines(cart.id).await?.len(), 1);
    assert!(pg.store.list_purchases(client.id, None).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn products_are_linked_to_categories() -> TestResult {
    let pg = start_postgres().await?;
    let seller = user(&pg.store, "seller@example.com", Role::Seller).await?;
    let categories = pg.store.list_categories().await?;
    let names: Vec<&str> = categories.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["Books", "Clothing", "Electronics", "Home", "Sports"]);
    let books = categories[0].id;
    let home = categories[3].id;

    let novel = pg
        .store
        .create_product(NewProduct {
            category_ids: vec![books, books],
            ..new_product(seller.id, "Novel", Decimal::new(1500, 2))
        })
        .await?;
    product(&pg.store, seller.id, "Lamp", Decimal::new(2000, 2)).await?;
    assert_eq!(novel.category_ids, vec![books]);

    let filtered = pg.store.list_products(Some(books)).await?;
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].id, novel.id);
    assert_eq!(pg.store.list_products(None).await?.len(), 2);

    let moved = pg
        .store
        .update_product(
            novel.id,
            ProductUpdate {
                category_ids: Some(vec![home]),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(moved.category_ids, vec![home]);
    assert!(pg.store.list_products(Some(books)).await?.is_empty());

    let unknown = pg
        .store
        .create_product(NewProduct {
            category_ids: vec![Uuid::new_v4()],
            ..new_product(seller.id, "Ghost", Decimal::ONE)
        })
        .await;
    assert!(matches!(unknown, Err(PortError::InvalidArgument(_))));
    assert!(matches!(
        pg.store.create_category("Books").await,
        Err(PortError::Conflict(_))
    ));
    Ok(())
}

#[tokio::test]
async fn deleting_a_user_closes_the_account() -> TestResult {
    let pg = start_postgres().await?;
    let seller = user(&pg.store, "seller@example.com", Role::Seller).await?;
    let client = user(&pg.store, "client@example.com", Role::Client).await?;
    let lamp = product(&pg.store, seller.id, "Lamp", Decimal::new(2000, 2)).await?;
    let client_cart = pg.store.get_or_create_cart(CartOwner::User(client.id)).await?;
    pg.store.upsert_item(client_cart.id, lamp.id, 1).await?;
    pg.store
        .create_auth_session("seller-session", seller.id, Utc::now() + chrono::Duration::hours(1))
        .await?;

    pg.store.delete_user(seller.id).await?;

    assert!(matches!(
        pg.store.validate_auth_session("seller-session").await,
        Err(PortError::Unauthorized)
    ));
    assert!(matches!(
        pg.store.get_user_by_email("seller@example.com").await,
        Err(PortError::NotFound(_))
    ));
    assert!(matches!(
        pg.store.get_product(lamp.id).await,
        Err(PortError::NotFound(_))
    ));
    assert!(pg.store.get_cart_lines(client_cart.id).await?.is_empty());
    assert!(matches!(
        pg.store.delete_user(seller.id).await,
        Err(PortError::NotFound(_))
    ));

    // The email is free again, and updates still respect live accounts.
    user(&pg.store, "seller@example.com", Role::Seller).await?;
    let taken = pg
        .store
        .update_user(
            client.id,
            UserUpdate {
                email: Some("seller@example.com".to_string()),
                ..UserUpdate::default()
            },
        )
        .await;
    assert!(matches!(taken, Err(PortError::Conflict(_))));
    Ok(())
}

#[tokio::test]
async fn expired_sessions_are_pruned() -> TestResult {
    let pg = start_postgres().await?;
    let client = user(&pg.store, "client@example.com", Role::Client).await?;
    let past = Utc::now() - chrono::Duration::hours(1);
    let sessions = "SELECT count(*) FROM auth_sessions WHERE user_id = $1";

    pg.store.create_auth_session("stale-1", client.id, past).await?;
    // Opening a session prunes the user's expired ones.
    pg.store.create_auth_session("stale-2", client.id, past).await?;
    assert_eq!(count(&pg.pool, sessions, client.id).await?, 1);

    assert!(matches!(
        pg.store.validate_auth_session("stale-2").await,
        Err(PortError::Unauthorized)
    ));
    assert_eq!(count(&pg.pool, sessions, client.id).await?, 0);

    pg.store
        .create_auth_session("fresh", client.id, Utc::now() + chrono::Duration::hours(1))
        .await?;
    assert_eq!(pg.store.validate_auth_session("fresh").await?.id, client.id);
    assert_eq!(count(&pg.pool, sessions, client.id).await?, 1);
    Ok(())
}
