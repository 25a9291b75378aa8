pub mod cart;
pub mod checkout;
pub mod domain;
pub mod ports;
pub mod purchases;

pub use cart::CartService;
pub use checkout::CheckoutEngine;
pub use domain::{
    AddedItem, AuthUser, Cart, CartLine, CartLineItem, CartOwner, CartView, Category,
    CheckoutOrder, NewProduct, NewUser, Product, ProductUpdate, Purchase, PurchaseLineItem,
    PurchaseStatus, Role, SessionToken, User, UserCredentials, UserUpdate,
};
pub use ports::{AccountStore, CartStore, CatalogStore, PortError, PortResult, PurchaseStore};
pub use purchases::PurchaseHistory;
