use crate::server::ServerRouter;
use axum::Router;

mod posts;
mod tags;
mod users;

pub fn routes() -> ServerRouter {
    Router::new()
        .merge(posts::routes())
        .merge(tags::routes())
        .merge(users::routes())
}
