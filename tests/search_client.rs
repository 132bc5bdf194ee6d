use std::time::Duration;

use bytes::Bytes;
use imagematch::{AppError, FileType, SearchClient, Threshold};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> SearchClient {
    SearchClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn uploads_the_query_image() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/image-feature/search-similar"))
        .and(query_param("threshold", "0.75"))
        .and(body_string_contains("name=\"file\"; filename=\"query.png\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "ok",
            "data": {
                "images": [
                    { "imageId": 42, "url": "/files/a.png", "md5": "abc", "similarity": 97.5 },
                    { "imageId": "43", "url": "/files/b.jpg", "similarity": 81.0 }
                ]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let results = client(&server)
        .search_similar(
            Bytes::from_static(b"\x89PNG"),
            "query.png",
            Threshold::new(0.75).unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(results.images.len(), 2);
    assert_eq!(results.images[0].image_id, "42");
    assert_eq!(results.images[1].image_id, "43");
    assert_eq!(results.images[1].md5, "");
    assert!(results.images[0].similarity > results.images[1].similarity);
}

#[tokio::test]
async fn fetches_similar_groups() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/image-feature/similar-groups"))
        .and(query_param("threshold", "0.9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "groups": [{
                    "groupId": 1,
                    "imageCount": 2,
                    "images": [
                        { "id": 7, "url": "/files/7.png", "fileType": 1, "md5": "x",
                          "createTime": "2024-03-01T10:00:00+08:00" },
                        { "id": 9, "url": "/files/9.webp", "fileType": 4 }
                    ]
                }],
                "groupCount": 1,
                "totalImages": 2,
                "threshold": 0.9
            }
        })))
        .mount(&server)
        .await;

    let groups = client(&server)
        .similar_groups(Threshold::new(0.9).unwrap())
        .await
        .unwrap();

    assert_eq!(groups.group_count, 1);
    assert_eq!(groups.total_images, 2);
    let images = &groups.groups[0].images;
    assert_eq!(images[0].file_type, FileType::Png);
    assert_eq!(images[1].file_type, FileType::WebP);
    assert!(images[0].created_at().is_some());
    assert!(images[1].created_at().is_none());
}

#[tokio::test]
async fn reported_failures_carry_the_service_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/image-feature/similar-groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "feature index is rebuilding"
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .similar_groups(Threshold::new(0.5).unwrap())
        .await
        .unwrap_err();
    match err {
        AppError::Service(message) => assert_eq!(message, "feature index is rebuilding"),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn bare_error_statuses_fall_back_to_a_generic_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&server)
        .await;

    let err = client(&server)
        .search_similar(Bytes::from_static(b"img"), "q.jpg", Threshold::new(0.8).unwrap())
        .await
        .unwrap_err();
    match err {
        AppError::Service(message) => {
            assert!(message.starts_with("search failed"), "{}", message);
            assert!(message.contains("500"), "{}", message);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn unreachable_service_is_a_service_error() {
    // Nothing listens on the discard port.
    let client = SearchClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
    let err = client
        .similar_groups(Threshold::new(0.9).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Service(_)));
    assert!(err.is_retryable());
}
