//! Request routing for the gateway peer.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value, json};

use crate::coap::{Method, Request, Response, ResponseCode};
use crate::core::{
    ACCESS_TOKEN_PATH, AM_INFO_PATH, APPLICATION_JOSE, APPLICATION_JSON, AUTHENTICATE_PATH,
};

type Handler = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

/// Maps `(method, path)` to a handler.
///
/// Unknown paths answer 4.04; known paths with another method answer 4.05.
#[derive(Clone, Default)]
pub struct Router {
    routes: Vec<(Method, String, Handler)>,
}

impl Router {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route. A later route for the same method and path wins.
    pub fn route<F>(mut self, method: Method, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        let path = path.into();
        self.routes.retain(|(m, p, _)| !(*m == method && *p == path));
        self.routes.push((method, path, Arc::new(handler)));
        self
    }

    /// Add a GET route.
    pub fn get<F>(self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        self.route(Method::Get, path, handler)
    }

    /// Add a POST route.
    pub fn post<F>(self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        self.route(Method::Post, path, handler)
    }

    /// Answer a request.
    pub fn handle(&self, request: &Request) -> Response {
        let mut path_known = false;
        for (method, path, handler) in &self.routes {
            if *path != request.path {
                continue;
            }
            if *method == request.method {
                return handler(request);
            }
            path_known = true;
        }
        if path_known {
            Response::new(ResponseCode::MethodNotAllowed)
        } else {
            Response::new(ResponseCode::NotFound)
        }
    }

    /// The standard thing gateway: `/authenticate`, `/aminfo` and
    /// `/accesstoken`.
    ///
    /// Access tokens are only issued for proofs naming a `tokenId` this
    /// router handed out.
    pub fn thing_gateway() -> Self {
        let issued: Arc<Mutex<HashSet<String>>> = Arc::default();
        let registry = issued.clone();

        Self::new()
            .post(AUTHENTICATE_PATH, move |request| authenticate(request, &registry))
            .get(AM_INFO_PATH, |_| {
                json_response(
                    ResponseCode::Content,
                    &json!({
                        "accessTokenUrl": ACCESS_TOKEN_PATH,
                        "thingsVersion": "1",
                    }),
                )
            })
            .post(ACCESS_TOKEN_PATH, move |request| access_token(request, &issued))
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.routes.iter().map(|(m, p, _)| format!("{m} {p}")))
            .finish()
    }
}

/// A response with a JSON body.
pub fn json_response(code: ResponseCode, body: &Value) -> Response {
    Response::new(code)
        .content_format(APPLICATION_JSON)
        .payload(body.to_string())
}

fn authenticate(request: &Request, issued: &Mutex<HashSet<String>>) -> Response {
    let body: Map<String, Value> = if request.payload.is_empty() {
        Map::new()
    } else {
        match serde_json::from_slice(&request.payload) {
            Ok(body) => body,
            Err(_) => return Response::new(ResponseCode::BadRequest),
        }
    };

    let token_id = match body.get("tokenId") {
        None => hex::encode(rand::random::<[u8; 16]>()),
        Some(Value::String(token)) if is_issued(issued, token) => token.clone(),
        Some(_) => return Response::new(ResponseCode::Unauthorized),
    };
    if let Ok(mut tokens) = issued.lock() {
        tokens.insert(token_id.clone());
    }
    json_response(ResponseCode::Valid, &json!({ "tokenId": token_id }))
}

fn access_token(request: &Request, issued: &Mutex<HashSet<String>>) -> Response {
    if request.content_format != Some(APPLICATION_JOSE) {
        return Response::new(ResponseCode::UnsupportedContentFormat);
    }
    let Some(claims) = proof_claims(&request.payload) else {
        return Response::new(ResponseCode::BadRequest);
    };
    let audience_ok = claims.get("aud").and_then(Value::as_str) == Some(ACCESS_TOKEN_PATH);
    let token_ok = claims
        .get("tokenId")
        .and_then(Value::as_str)
        .is_some_and(|token| is_issued(issued, token));
    if !audience_ok || !token_ok {
        return Response::new(ResponseCode::Unauthorized);
    }

    json_response(
        ResponseCode::Changed,
        &json!({
            "access_token": hex::encode(rand::random::<[u8; 24]>()),
            "token_type": "Bearer",
            "expires_in": 3599,
            "scope": "thing",
        }),
    )
}

fn is_issued(issued: &Mutex<HashSet<String>>, token: &str) -> bool {
    issued.lock().map(|tokens| tokens.contains(token)).unwrap_or(false)
}

/// Claims of a compact JWS. The signature is not checked.
fn proof_claims(payload: &[u8]) -> Option<Map<String, Value>> {
    let compact = std::str::from_utf8(payload).ok()?;
    let mut segments = compact.split('.');
    let (_header, claims, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }
    let claims = URL_SAFE_NO_PAD.decode(claims).ok()?;
    serde_json::from_slice(&claims).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{ProofClaims, ProofOfPossession, generate_p256};

    fn token_id(response: &Response) -> String {
        let body: Value = serde_json::from_slice(&response.payload).unwrap();
        body["tokenId"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_unknown_path_and_method() {
        let router = Router::new().get("/ping", |_| Response::new(ResponseCode::Content));

        assert_eq!(router.handle(&Request::get("/ping")).code, ResponseCode::Content);
        assert_eq!(router.handle(&Request::post("/ping")).code, ResponseCode::MethodNotAllowed);
        assert_eq!(router.handle(&Request::get("/nope")).code, ResponseCode::NotFound);
    }

    #[test]
    fn test_later_route_wins() {
        let router = Router::new()
            .get("/x", |_| Response::new(ResponseCode::Content))
            .get("/x", |_| Response::new(ResponseCode::BadGateway));
        assert_eq!(router.handle(&Request::get("/x")).code, ResponseCode::BadGateway);
    }

    #[test]
    fn test_thing_gateway_flow() {
        let router = Router::thing_gateway();

        let auth = router.handle(&Request::post(AUTHENTICATE_PATH).payload("{}"));
        assert_eq!(auth.code, ResponseCode::Valid);
        let token = token_id(&auth);

        let info = router.handle(&Request::get(AM_INFO_PATH));
        assert_eq!(info.code, ResponseCode::Content);

        let key = generate_p256();
        let proof = ProofOfPossession::sign(&key, ProofClaims::new(ACCESS_TOKEN_PATH, token)).unwrap();
        let issued = router.handle(
            &Request::post(ACCESS_TOKEN_PATH)
                .content_format(APPLICATION_JOSE)
                .payload(proof.into_string()),
        );
        assert_eq!(issued.code, ResponseCode::Changed);
        let body: Value = serde_json::from_slice(&issued.payload).unwrap();
        assert!(body["access_token"].is_string());
    }

    #[test]
    fn test_thing_gateway_rejects_unknown_token() {
        let router = Router::thing_gateway();

        let auth = router.handle(&Request::post(AUTHENTICATE_PATH).payload(r#"{"tokenId":"stale"}"#));
        assert_eq!(auth.code, ResponseCode::Unauthorized);

        let key = generate_p256();
        let proof = ProofOfPossession::sign(&key, ProofClaims::new(ACCESS_TOKEN_PATH, "stale")).unwrap();
        let response = router.handle(
            &Request::post(ACCESS_TOKEN_PATH)
                .content_format(APPLICATION_JOSE)
                .payload(proof.into_string()),
        );
        assert_eq!(response.code, ResponseCode::Unauthorized);
    }

    #[test]
    fn test_thing_gateway_rejects_malformed_proof() {
        let router = Router::thing_gateway();

        let response = router.handle(&Request::post(ACCESS_TOKEN_PATH).payload("a.b.c"));
        assert_eq!(response.code, ResponseCode::UnsupportedContentFormat);

        let response = router.handle(
            &Request::post(ACCESS_TOKEN_PATH)
                .content_format(APPLICATION_JOSE)
                .payload("not-a-jws"),
        );
        assert_eq!(response.code, ResponseCode::BadRequest);
    }
}
