// src/main.rs
//! Punto de entrada de `sales-analytics-service`.
//!
//! - Cargar configuración, logging y métricas.
//! - Construir almacenes y casos de uso, arrancar el servidor HTTP y el
//!   worker de informes.
//! - Apagado ordenado: dejar de aceptar peticiones, terminar los informes en
//!   curso y salir con un periodo de gracia acotado.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{select, signal, sync::broadcast, task::JoinSet};
use tracing::{error, info, warn};

use sales_analytics_service::adapter::http::routes::build_http_router;
use sales_analytics_service::config::app_config::AppConfig;
use sales_analytics_service::service::clock::SystemClock;
use sales_analytics_service::state::{AppState, Stores};
use sales_analytics_service::telemetry;

/// Señal de apagado compartida entre tareas.
#[derive(Clone)]
struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    fn new() -> Self {
        let (tx, _rx) = broadcast::channel(8);
        Self { tx }
    }
    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }
    fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

#[tokio::main]
async fn main() {
    // 1) Configuración
    let cfg = match AppConfig::load() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("No se pudo cargar la configuración: {e:#}");
            std::process::exit(1);
        }
    };

    // 2) Logging + métricas
    if let Err(e) = telemetry::tracing::init_tracing(&cfg.logging) {
        eprintln!("Tracing parcial: {e}");
    }
    let metrics_exporter = match telemetry::metrics::install_exporter() {
        Ok(h) => Some(h),
        Err(e) => {
            warn!(error = %e, "métricas deshabilitadas");
            None
        }
    };

    // 3) Estado compartido
    let stores = match Stores::from_config(&cfg).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = ?e, "no se pudo inicializar el almacenamiento");
            std::process::exit(1);
        }
    };
    let state = match AppState::build(cfg.clone(), stores, Arc::new(SystemClock), metrics_exporter) {
        Ok(s) => s,
        Err(e) => {
            error!(error = ?e, "no se pudo construir el estado de la aplicación");
            std::process::exit(1);
        }
    };

    let shutdown = Shutdown::new();
    let mut tasks = JoinSet::new();

    // 4) Servidor HTTP
    let http_addr: SocketAddr = match cfg.http.bind.parse() {
        Ok(a) => a,
        Err(e) => {
            error!(bind = %cfg.http.bind, error = %e, "http.bind inválido");
            std::process::exit(1);
        }
    };
    {
        let app = build_http_router(state.clone());
        let mut http_shutdown_rx = shutdown.subscribe();
        tasks.spawn(async move {
            info!(%http_addr, "HTTP server escuchando");
            let server = axum::Server::bind(&http_addr)
                .serve(app.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = http_shutdown_rx.recv().await;
                    info!("Recibida señal de shutdown para HTTP");
                });
            if let Err(e) = server.await {
                error!(error = ?e, "HTTP server finalizó con error");
            }
        });
    }

    // 5) Worker de informes
    let worker = state.report_worker().start();
    {
        let mut worker_shutdown_rx = shutdown.subscribe();
        tasks.spawn(async move {
            let _ = worker_shutdown_rx.recv().await;
            info!("Recibida señal de shutdown para el worker de informes");
            if let Err(e) = worker.shutdown().await {
                error!(error = ?e, "el worker de informes no se detuvo limpiamente");
            }
        });
    }

    // 6) Señales del SO
    info!(profile = %cfg.environment.profile, "sales-analytics-service iniciado");
    wait_for_signal().await;
    shutdown.trigger();

    let grace = Duration::from_secs(10);
    let drained = tokio::time::timeout(grace, async {
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!(error = ?e, "tarea terminó con panic durante el shutdown");
            }
        }
    })
    .await;
    match drained {
        Ok(()) => info!("Shutdown limpio completado"),
        Err(_) => warn!("Timeout en shutdown; forzando salida"),
    }
    info!("Servicio detenido");
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "no se pudo registrar el handler de Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "no se pudo registrar SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Recibida señal de parada: iniciando graceful shutdown");
}
