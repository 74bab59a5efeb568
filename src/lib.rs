// src/lib.rs
//! Servicio de analítica comercial: KPIs, series para gráficos, drilldown,
//! exportación y generación asíncrona de informes con resumen IA.

pub mod state;

pub mod domain {
    pub mod error;
    pub mod model {
        pub mod analytics;
        pub mod crm;
        pub mod filter;
        pub mod prediction;
        pub mod principal;
        pub mod report;
    }
}

pub mod service {
    pub mod access_gate;
    pub mod aggregation_engine;
    pub mod clock;
    pub mod data_exporter;
    pub mod filter_normalizer;
    pub mod predictive_model;
    pub mod result_cache;
    pub mod summary_generator;
}

pub mod repository {
    pub mod crm_store;
    pub mod job_queue;
    pub mod prediction_store;
    pub mod report_store;
}

pub mod usecase {
    pub mod export_analytics;
    pub mod manage_report_configurations;
    pub mod query_analytics;
    pub mod report_pipeline;
    pub mod sales_forecast;
}

pub mod scheduler {
    pub mod report_worker;
}

pub mod adapter {
    pub mod http {
        pub mod controller;
        pub mod middleware;
        pub mod routes;
    }
    pub mod llm {
        pub mod openai_client;
    }
}

pub mod config {
    pub mod app_config;
    pub mod llm_config;
}

pub mod telemetry {
    pub mod metrics;
    pub mod tracing;
}
