pub mod health;
pub mod token;
pub mod verify;

use axum::response::IntoResponse;

// axum handler for the root banner
pub async fn root() -> impl IntoResponse {
    concat!(env!("CARGO_PKG_NAME"), " - ", env!("CARGO_PKG_DESCRIPTION"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn root_banner_names_the_service() {
        let response = root().await.into_response();
        let body = to_bytes(response.into_body(), 1024).await.expect("body");
        let banner = String::from_utf8(body.to_vec()).expect("utf8");
        assert!(banner.starts_with("pordisto"));
    }
}
