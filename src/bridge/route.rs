//! Per-route bridge: compiled context, argument style, status codes and renderer.

use std::borrow::Cow;
use std::sync::Arc;

use crate::bridge::anyway::{AnywayArguments, AnywayRenderer};
use crate::bridge::bff::{BffArguments, BffRenderer, HeaderContext};
use crate::bridge::context::{BridgeContext, EncodedRequest};
use crate::bridge::response::{JsonRenderer, ResponseCodes, ResponseRenderer};
use crate::bridge::source::{simple_arguments, ArgumentProvider, RequestSource};
use crate::config::schema::{ArgumentStyle, BridgeConfig, ResponseConfig};
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::RequestIdGenerator;

/// Where a route's invocation target comes from.
#[derive(Debug, Clone)]
enum RouteContext {
    /// Compiled once from configuration.
    Static(Arc<BridgeContext>),
    /// Built per request from `x-dubbo-*` headers.
    Headers(Arc<HeaderContext>),
}

/// Everything a route needs to bridge one HTTP request to Dubbo and back.
#[derive(Clone)]
pub struct DubboBridge {
    context: RouteContext,
    arguments: ArgumentStyle,
    codes: ResponseCodes,
    renderer: Arc<dyn ResponseRenderer>,
}

impl std::fmt::Debug for DubboBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("DubboBridge");
        match &self.context {
            RouteContext::Static(context) => s
                .field("service", &context.service())
                .field("method", &context.method()),
            RouteContext::Headers(_) => s.field("context", &"headers"),
        };
        s.field("arguments", &self.arguments)
            .field("codes", &self.codes)
            .finish()
    }
}

impl DubboBridge {
    pub fn new(context: BridgeContext, codes: ResponseCodes) -> Self {
        Self {
            context: RouteContext::Static(Arc::new(context)),
            arguments: ArgumentStyle::Simple,
            codes,
            renderer: Arc::new(JsonRenderer),
        }
    }

    /// Compile a route's bridge section. Fails on invalid parameter defaults
    /// and when not exactly one of `context` and `dynamic` is set.
    pub fn from_config(config: &BridgeConfig) -> BridgeResult<Self> {
        let context = match (&config.context, &config.dynamic) {
            (Some(context), None) => {
                RouteContext::Static(Arc::new(BridgeContext::from_config(context)?))
            }
            (None, Some(dynamic)) => {
                RouteContext::Headers(Arc::new(HeaderContext::from_config(dynamic)))
            }
            _ => {
                return Err(BridgeError::InvalidArguments(
                    "bridge must set exactly one of context, dynamic".to_string(),
                ))
            }
        };
        let codes = ResponseCodes {
            exception: config.resp_exception_code,
            protocol_error: config.protocol_error_code,
            ..ResponseCodes::default()
        };
        let renderer: Arc<dyn ResponseRenderer> = match &config.response {
            ResponseConfig::Json => Arc::new(JsonRenderer),
            ResponseConfig::Anyway { instance } => Arc::new(AnywayRenderer::new(instance.as_str())),
            ResponseConfig::Bff {
                instance,
                system_id,
            } => Arc::new(BffRenderer::new(instance.as_str(), system_id.as_str())),
        };

        Ok(Self {
            context,
            arguments: config.arguments,
            codes,
            renderer: Arc::new(JsonRenderer),
        }
        .with_renderer(renderer))
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ResponseRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// The compiled context, unless the route builds one per request.
    pub fn context(&self) -> Option<&BridgeContext> {
        match &self.context {
            RouteContext::Static(context) => Some(context),
            RouteContext::Headers(_) => None,
        }
    }

    pub fn arguments(&self) -> ArgumentStyle {
        self.arguments
    }

    pub fn codes(&self) -> &ResponseCodes {
        &self.codes
    }

    pub fn renderer(&self) -> &dyn ResponseRenderer {
        self.renderer.as_ref()
    }

    /// Build the request frame for `source` with the route's argument provider.
    pub fn encode(
        &self,
        source: &RequestSource,
        ids: &RequestIdGenerator,
    ) -> BridgeResult<EncodedRequest> {
        let context: Cow<'_, BridgeContext> = match &self.context {
            RouteContext::Static(context) => Cow::Borrowed(context.as_ref()),
            RouteContext::Headers(headers) => Cow::Owned(headers.resolve(source)?),
        };

        let arguments: Box<dyn ArgumentProvider> = match self.arguments {
            ArgumentStyle::Simple => simple_arguments(&context, source)?,
            ArgumentStyle::Anyway => Box::new(AnywayArguments::new(&context, source)?),
            ArgumentStyle::Bff => Box::new(BffArguments::new(&context, source)?),
        };
        context.build_request(source, arguments.as_ref(), ids)
    }
}
