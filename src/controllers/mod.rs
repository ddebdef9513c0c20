pub mod analytics;
pub mod bookings;
pub mod queue;

use axum::Router;
use std::sync::Arc;

use crate::config::FeatureFlags;

pub fn routes(features: &FeatureFlags) -> Router<Arc<crate::AppState>> {
    let mut router = Router::new()
        .merge(bookings::routes())
        .merge(queue::token_routes());
    if features.enable_analytics {
        router = router.merge(analytics::routes());
    }
    // Сброс состояния включается только на стендах.
    if features.enable_test_api {
        router = router.merge(test::routes());
    }
    router
}
