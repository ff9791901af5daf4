use serde_json::Value;

use crate::error::Result;
use crate::transport::{ApiClient, RequestSpec};

pub const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

/// Upload a JPEG to the environment's image store.
pub async fn upload_image(api: &ApiClient, filename: &str, image: Vec<u8>) -> Result<Value> {
    let credential = api.credential(None)?;
    let url = api.environment_url(&credential, "images");
    let spec = RequestSpec::post(url, credential)
        .raw(image, IMAGE_CONTENT_TYPE)
        .header("Content-Disposition", format!("attachment; filename={filename}"));
    api.execute_json(spec).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::test_support::{client, token_mock};
    use mockito::Server;

    #[tokio::test]
    async fn image_is_sent_as_jpeg_attachment() {
        let mut server = Server::new_async().await;
        let _token = token_mock(&mut server, "env-1", "tok").await;
        let upload = server
            .mock("POST", "/v1/environments/env-1/images")
            .match_header("content-type", IMAGE_CONTENT_TYPE)
            .match_header("content-disposition", "attachment; filename=logo.jpg")
            .match_body(vec![0xff, 0xd8, 0xff])
            .with_status(202)
            .with_body(r#"{"id":"img-1"}"#)
            .create_async()
            .await;

        let api = client(&server);
        let result = upload_image(&api, "logo.jpg", vec![0xff, 0xd8, 0xff]).await.unwrap();
        assert_eq!(result["id"], "img-1");
        upload.assert_async().await;
    }
}
