use std::sync::Arc;
use std::time::Instant;

use model::{
    ActionError, EngineError, ExecutionContext, ObjectRef, Principal, RequestDescriptor,
    RequestKind, ScriptEnvironment, ScriptError, StoreError, Value,
};
use response::ResponseBuffer;
use serde_json::Map;

use crate::context::AppContext;
use crate::evaluator::{EvalState, Job, Outcome, Shared, Submission, error_fragment};
use crate::resolver::{Action, PathResolver, Resolution};
use crate::transaction::{CommitError, TransactionController, TxCell, retry_delay};

/// Why one pass through the request loop did not complete.
enum Failure {
    Conflict(String),
    Error(EngineError),
    /// The worker was stopped; drop everything without publishing.
    Lost,
}

impl From<StoreError> for Failure {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(conflict) => Failure::Conflict(conflict.0),
            other => Failure::Error(EngineError::application(other.to_string())),
        }
    }
}

impl From<CommitError> for Failure {
    fn from(err: CommitError) -> Self {
        match err {
            CommitError::OwnershipLost => Failure::Lost,
            CommitError::Store(err) => err.into(),
        }
    }
}

/// The thread side of an evaluator.
pub(crate) struct Worker {
    shared: Arc<Shared>,
    token: u64,
    cell: Arc<TxCell>,
    env: Option<Box<dyn ScriptEnvironment>>,
}

impl Worker {
    pub fn new(shared: Arc<Shared>, token: u64, cell: Arc<TxCell>) -> Self {
        Self {
            shared,
            token,
            cell,
            env: None,
        }
    }

    pub fn run(mut self) {
        while let Some(submission) = self.next_submission() {
            let Submission { id, job } = submission;
            let outcome = match job {
                Job::Http(request) => self.serve_http(&request).map(Outcome::Response),
                Job::Rpc { method, args } => self.serve_rpc(&method, &args).map(Outcome::Value),
                Job::Internal {
                    this,
                    name,
                    args,
                    principal,
                } => self
                    .serve_internal(this.as_ref(), &name, &args, principal)
                    .map(Outcome::Value),
            };

            let published = match outcome {
                Some(outcome) => self.shared.publish(self.token, id, outcome),
                None => false,
            };
            if !published {
                self.abandon();
                return;
            }
        }
        tracing::debug!(
            "Worker {} of evaluator {} exiting",
            self.token,
            self.shared.id
        );
    }

    /// Wait for the next submission. Returns `None` when ownership is gone or
    /// the idle ceiling passes; on idle expiry the evaluator is released.
    fn next_submission(&self) -> Option<Submission> {
        let deadline = Instant::now() + self.shared.app.config.idle_timeout();
        let mut monitor = self.shared.monitor.lock();
        loop {
            if monitor.owner != Some(self.token) {
                return None;
            }
            if let Some(submission) = monitor.pending.take() {
                monitor.state = EvalState::Dispatching;
                return Some(submission);
            }
            if monitor.state == EvalState::Done {
                monitor.state = EvalState::Idle;
            }
            if self
                .shared
                .cond
                .wait_until(&mut monitor, deadline)
                .timed_out()
                && monitor.pending.is_none()
            {
                if monitor.owner == Some(self.token) {
                    tracing::info!(
                        "Releasing idle evaluator {} of {}",
                        self.shared.id,
                        self.shared.app.name()
                    );
                    monitor.owner = None;
                    monitor.handle = None;
                    monitor.tx_cell = None;
                    monitor.state = EvalState::Idle;
                }
                return None;
            }
        }
    }

    fn abandon(&self) {
        TransactionController::new(&self.shared, &self.cell, self.token).release();
        tracing::warn!(
            "Worker {} of evaluator {} abandoned its request after being stopped",
            self.token,
            self.shared.id
        );
    }

    fn environment(&mut self) -> Result<(), EngineError> {
        if self.env.is_none() {
            let env = self.shared.app.scripting.create_environment()?;
            self.env = Some(env);
        }
        Ok(())
    }

    // ========== HTTP ==========

    fn serve_http(&mut self, request: &RequestDescriptor) -> Option<Arc<ResponseBuffer>> {
        let principal = request.principal.as_ref();
        let carried_message = principal.and_then(|p| p.take_message());
        let served = self.run_http(request, carried_message.clone());
        if served.is_none() {
            // nobody saw the message; keep it for the principal's next request
            if let (Some(principal), Some(message)) = (principal, carried_message) {
                principal.restore_message(message);
            }
        }
        served
    }

    fn run_http(
        &mut self,
        request: &RequestDescriptor,
        carried_message: Option<String>,
    ) -> Option<Arc<ResponseBuffer>> {
        let app = Arc::clone(&self.shared.app);
        let config = &app.config;
        let started = Instant::now();
        let tx_name = format!("{}/{}", app.name(), request.path);

        let mut res =
            ResponseBuffer::new(request.conditional.clone()).with_auto_etags(config.auto_etags);

        if let Err(err) = self.environment() {
            tracing::error!("Exception in {}: {}", tx_name, err);
            app.record_error();
            res.report_error(
                app.name(),
                &err.to_string(),
                err.trace(),
                config.debug,
                config.suppress_error_page,
            );
            return Some(finish(res, &app));
        }
        let Worker {
            shared,
            token,
            cell,
            env,
        } = self;
        let env = env.as_deref_mut()?;
        let controller = TransactionController::new(shared, cell, *token);

        let mut error: Option<EngineError> = request.error.clone().map(EngineError::application);
        let mut tries = request.conflict_retries;

        loop {
            if !shared.owns(*token) {
                return None;
            }
            res.unwind_nested();
            if res.message().is_none() {
                res.set_message(carried_message.clone());
            }

            let failure = match attempt_http(
                &app,
                shared,
                *token,
                &controller,
                env,
                request,
                &mut res,
                error.as_ref(),
                &tx_name,
            ) {
                Ok(()) => break,
                Err(Failure::Lost) => return None,
                Err(Failure::Conflict(message)) => {
                    res.reset();
                    tries += 1;
                    if tries < config.max_conflict_retries {
                        controller.abort(true);
                        let delay = retry_delay(config.retry_base_ms, tries);
                        tracing::debug!(
                            "Conflict in {} (attempt {}): {}; retrying in {:?}",
                            tx_name,
                            tries,
                            message,
                            delay
                        );
                        if !shared.enter(*token, EvalState::RetryWait) {
                            return None;
                        }
                        std::thread::sleep(delay);
                        continue;
                    }
                    controller.abort(false);
                    EngineError::Concurrency(format!(
                        "Couldn't complete transaction due to heavy object traffic (tried {} times)",
                        tries
                    ))
                }
                Err(Failure::Error(err)) => {
                    controller.abort(false);
                    if !shared.owns(*token) {
                        return None;
                    }
                    res.reset();
                    err
                }
            };

            tracing::error!("Exception in {}: {}", tx_name, failure);
            if config.debug {
                if let Some(trace) = failure.trace() {
                    tracing::debug!("{}", trace);
                }
            }

            match &error {
                None => {
                    app.record_error();
                    error = Some(failure);
                }
                Some(first) => {
                    // failed again while handling an error
                    let mut message = String::new();
                    response::html::encode_form(&first.to_string(), &mut message);
                    res.reset();
                    res.write(&error_fragment(app.name(), &message));
                    break;
                }
            }
        }

        let res = finish(res, &app);
        tracing::debug!(
            "{} {} in {}ms",
            tx_name,
            res.status(),
            started.elapsed().as_millis()
        );
        Some(res)
    }

    // ========== RPC / internal ==========

    fn serve_rpc(&mut self, method: &str, args: &[Value]) -> Option<Result<Value, EngineError>> {
        let app = Arc::clone(&self.shared.app);
        let tx_name = format!("{}:rpc/{}", app.name(), method);
        let request = RequestDescriptor::new("RPC", method);

        let (this, name) = match resolve_rpc_target(&app, method) {
            Ok(target) => target,
            Err(err) => return Some(Err(err)),
        };
        self.run_function(&tx_name, RequestKind::Rpc, &request, Some(&this), &name, args)
    }

    fn serve_internal(
        &mut self,
        this: Option<&ObjectRef>,
        name: &str,
        args: &[Value],
        principal: Option<Arc<Principal>>,
    ) -> Option<Result<Value, EngineError>> {
        if let Err(err) = self.environment() {
            return Some(Err(err));
        }
        let exists = match (this, self.env.as_deref()) {
            (None, Some(env)) => env.has_function(None, name),
            _ => true,
        };
        if !exists {
            return Some(Ok(Value::Null));
        }

        let tx_name = format!("{}:internal/{}", self.shared.app.name(), name);
        let mut request = RequestDescriptor::new("INTERNAL", name);
        request.principal = principal;
        self.run_function(&tx_name, RequestKind::Internal, &request, this, name, args)
    }

    /// Invoke one function inside its own transaction. No retries.
    fn run_function(
        &mut self,
        tx_name: &str,
        kind: RequestKind,
        request: &RequestDescriptor,
        this: Option<&ObjectRef>,
        name: &str,
        args: &[Value],
    ) -> Option<Result<Value, EngineError>> {
        if let Err(err) = self.environment() {
            return Some(Err(err));
        }
        let app = Arc::clone(&self.shared.app);
        let Worker {
            shared,
            token,
            cell,
            env,
        } = self;
        let env = env.as_deref_mut()?;
        let controller = TransactionController::new(shared, cell, *token);

        let result = (|| -> Result<Value, Failure> {
            if !shared.enter(*token, EvalState::Dispatching) {
                return Err(Failure::Lost);
            }
            controller.begin(tx_name)?;
            if !shared.enter(*token, EvalState::Executing) {
                return Err(Failure::Lost);
            }

            let mut res = ResponseBuffer::default();
            let value = {
                let mut slot = cell.lock();
                let Some(tx) = slot.as_deref_mut() else {
                    return Err(Failure::Lost);
                };
                let root = [app.graph.root()];
                let mut ctx = ExecutionContext {
                    app_name: app.name(),
                    kind,
                    request,
                    path: &root,
                    action: name,
                    graph: &*app.graph,
                    skins: &*app.skins,
                    res: &mut res,
                    tx,
                };
                match env.invoke(this, name, args, &mut ctx) {
                    Ok(value) => value,
                    Err(ActionError::Redirect(_)) => Value::Null,
                    Err(ActionError::Conflict(conflict)) => {
                        return Err(Failure::Error(EngineError::Concurrency(conflict.0)));
                    }
                    Err(ActionError::Script(err)) => return Err(Failure::Error(err.into())),
                }
            };

            if !shared.enter(*token, EvalState::Committing) {
                return Err(Failure::Lost);
            }
            match controller.commit() {
                Ok(()) => Ok(value),
                Err(CommitError::Store(StoreError::Conflict(conflict))) => {
                    Err(Failure::Error(EngineError::Concurrency(conflict.0)))
                }
                Err(err) => Err(err.into()),
            }
        })();

        match result {
            Ok(value) => Some(Ok(value)),
            Err(Failure::Lost) => None,
            Err(Failure::Conflict(message)) => {
                controller.abort(false);
                Some(Err(EngineError::Concurrency(message)))
            }
            Err(Failure::Error(err)) => {
                controller.abort(false);
                if !shared.owns(*token) {
                    return None;
                }
                tracing::error!("Exception in {}: {}", tx_name, err);
                Some(Err(err))
            }
        }
    }
}

/// Close the response with the application's default charset and freeze it.
fn finish(mut res: ResponseBuffer, app: &AppContext) -> Arc<ResponseBuffer> {
    if let Err(err) = res.close(Some(&app.config.charset)) {
        tracing::warn!("Encoding error in {}: {}", app.name(), err);
    }
    Arc::new(res)
}

/// Walk a dotted RPC method name down from the root and check access.
fn resolve_rpc_target(app: &AppContext, method: &str) -> Result<(ObjectRef, String), EngineError> {
    let mut current = Some(app.graph.root());
    let name = match method.rsplit_once('.') {
        Some((path, name)) => {
            for segment in path.split('.').filter(|s| !s.is_empty()) {
                current = current.and_then(|object| app.graph.child(&object, segment));
            }
            name
        }
        None => method,
    };
    let this = current.ok_or_else(|| {
        EngineError::NotFound(format!("Method name \"{}\" could not be resolved.", method))
    })?;

    let type_tag = app.graph.type_tag(&this);
    if !app.config.rpc_allowed(&type_tag, name) {
        return Err(EngineError::Forbidden(format!(
            "Method {}.{} is not accessible via RPC",
            type_tag, name
        )));
    }
    Ok((this, name.to_string()))
}

/// One pass of the HTTP request loop: resolve, execute, commit.
#[allow(clippy::too_many_arguments)]
fn attempt_http(
    app: &AppContext,
    shared: &Shared,
    token: u64,
    controller: &TransactionController<'_>,
    env: &mut dyn ScriptEnvironment,
    request: &RequestDescriptor,
    res: &mut ResponseBuffer,
    error: Option<&EngineError>,
    tx_name: &str,
) -> Result<(), Failure> {
    let config = &app.config;
    if !shared.enter(token, EvalState::Dispatching) {
        return Err(Failure::Lost);
    }
    controller.begin(tx_name)?;

    let resolution = {
        let resolver = PathResolver::new(&*app.graph, &*app.skins, &*env, config);
        match error {
            Some(err) => {
                res.set_error(Some(err.to_string()));
                match resolver.root_action(&config.error_action) {
                    Some(resolution) => resolution,
                    None => {
                        res.report_error(
                            app.name(),
                            &err.to_string(),
                            err.trace(),
                            config.debug,
                            config.suppress_error_page,
                        );
                        if matches!(err, EngineError::NotFound(_)) {
                            res.set_status(404);
                        }
                        return commit(shared, token, controller);
                    }
                }
            }
            None => match resolver.resolve(&request.path) {
                Ok(resolution) => resolution,
                Err(EngineError::NotFound(message)) => {
                    res.set_status(404);
                    resolver
                        .root_action(&config.not_found_action)
                        .ok_or(Failure::Error(EngineError::NotFound(message)))?
                }
                Err(err) => return Err(Failure::Error(err)),
            },
        }
    };

    if !shared.enter(token, EvalState::Executing) {
        return Err(Failure::Lost);
    }
    let executed = {
        let mut slot = controller.cell().lock();
        let Some(tx) = slot.as_deref_mut() else {
            return Err(Failure::Lost);
        };
        let mut ctx = ExecutionContext {
            app_name: app.name(),
            kind: RequestKind::Http,
            request,
            path: &resolution.path,
            action: resolution.action.exposed_name(),
            graph: &*app.graph,
            skins: &*app.skins,
            res: &mut *res,
            tx,
        };
        execute(app, env, &resolution, &mut ctx)
    };

    let redirected = match executed {
        Ok(()) => false,
        Err(ActionError::Redirect(signal)) => {
            tracing::debug!("{} ended with {}", tx_name, signal);
            true
        }
        Err(ActionError::Conflict(conflict)) => return Err(Failure::Conflict(conflict.0)),
        Err(ActionError::Script(err)) => return Err(Failure::Error(err.into())),
    };

    commit(shared, token, controller)?;
    // the message outlives the redirect only once its transaction is in
    if redirected {
        if let (Some(principal), Some(message)) = (&request.principal, res.message()) {
            principal.set_message(Some(message.to_string()));
        }
    }
    Ok(())
}

fn commit(
    shared: &Shared,
    token: u64,
    controller: &TransactionController<'_>,
) -> Result<(), Failure> {
    if !shared.enter(token, EvalState::Committing) {
        return Err(Failure::Lost);
    }
    controller.commit()?;
    Ok(())
}

/// Run the `onRequest` hook, the resolved action and any skin the action
/// queued in `res.skin`.
fn execute(
    app: &AppContext,
    env: &mut dyn ScriptEnvironment,
    resolution: &Resolution,
    ctx: &mut ExecutionContext<'_>,
) -> Result<(), ActionError> {
    let this = &resolution.context;
    let params: Map<String, Value> = ctx
        .request
        .params
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    if env.has_function(Some(this), "onRequest") {
        match env.invoke(Some(this), "onRequest", &[], ctx) {
            Ok(_) => {}
            Err(ActionError::Redirect(signal)) => return Err(ActionError::Redirect(signal)),
            Err(err) => tracing::debug!("onRequest on {} failed: {}", this, err),
        }
    }

    match &resolution.action {
        Action::Function { name } => {
            env.invoke(Some(this), name, &[], ctx)?;
        }
        Action::Template {
            requested,
            name,
            content_type,
        } => {
            ctx.res.set_content_type(content_type);
            if !ctx.render_skin(this, name, &params)? {
                return Err(ScriptError::new(format!(
                    "Skin {} not found in {}",
                    requested, ctx.request.path
                ))
                .into());
            }
        }
    }

    let Some(skin) = ctx.res.skin().map(str::to_string) else {
        return Ok(());
    };
    let (target, name) = match skin.split_once('.') {
        Some((family, name)) => {
            let target = resolution
                .path
                .iter()
                .rev()
                .find(|object| app.graph.type_tag(object).eq_ignore_ascii_case(family))
                .ok_or_else(|| ScriptError::new(format!("Skin {} not found in path.", skin)))?;
            (target, name)
        }
        None => (this, skin.as_str()),
    };
    if !ctx.render_skin(target, name, &params)? {
        return Err(ScriptError::new(format!("Skin {} not found", skin)).into());
    }
    Ok(())
}
